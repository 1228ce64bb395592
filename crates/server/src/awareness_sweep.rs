//! Periodic presence expiry (§4.6): swept entries become `leave`
//! notifications broadcast to every awareness subscriber of the document
//! they belonged to, the same fan-out path a live `awareness_update` uses.

use sync_protocol::{AwarenessUpdateFrame, Frame, FrameBody};
use tracing::debug;

use crate::state::AppState;

/// Runs until the process exits, waking up every `awareness.sweep()` to
/// expire stale presence entries.
pub async fn run(state: AppState) {
    let mut interval = tokio::time::interval(state.awareness.sweep_interval());
    interval.tick().await; // skip the immediate first tick
    loop {
        interval.tick().await;
        let now_ms = state.clock.now_ms();
        let expired = state.awareness.sweep_expired(now_ms);
        if expired.is_empty() {
            continue;
        }
        debug!(count = expired.len(), "awareness: sweep expired entries");
        for (doc_id, entry) in expired {
            let leave = Frame::new(
                now_ms,
                FrameBody::AwarenessUpdate(AwarenessUpdateFrame {
                    id: uuid::Uuid::new_v4().to_string(),
                    doc_id: doc_id.clone(),
                    client_id: entry.client_id,
                    state: None,
                    clock: entry.clock,
                }),
            );
            state.registry.broadcast_awareness(&doc_id, &leave, None);
        }
    }
}
