//! The `Bus` capability (§6): cross-node pub/sub fan-out with at-least-once
//! delivery and no ordering guarantee across channels. A real Redis-like
//! broker is explicitly out of scope (§1); [`LocalBus`] is the in-process
//! reference implementation the core builds and tests against.

use std::pin::Pin;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

/// Capacity of each channel's broadcast ring buffer. A slow subscriber that
/// falls this far behind starts missing envelopes — acceptable per the
/// bus's at-least-once, no-ordering contract (§6, §7 `BusUnavailable`).
const CHANNEL_CAPACITY: usize = 1024;

/// A cross-node pub/sub message: an opaque payload tagged with the
/// publishing node's id so receivers can drop their own echoes (§4.7 loop
/// prevention).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub origin_node_id: String,
    pub channel: String,
    pub payload: serde_json::Value,
}

/// Bus-level failure (§7 `BusUnavailable` — non-fatal, logged, retried).
#[derive(Debug, Error, Clone)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

/// Cross-node pub/sub (§6). Delivery is at-least-once with no ordering
/// guarantee across channels; the core tolerates this because every
/// consumer of bus envelopes (the document coordinator, the awareness
/// store) is idempotent under its own merge rule (§4.7).
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, channel: &str, envelope: BusEnvelope) -> Result<(), BusError>;

    /// Subscribe to `channel`, returning a stream of every envelope
    /// published to it from this point on (including this node's own —
    /// callers filter out their own origin id per §4.7).
    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = BusEnvelope> + Send>>, BusError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError>;
}

/// In-process [`Bus`] backed by one [`tokio::sync::broadcast`] channel per
/// channel name. Never fails to publish or subscribe; exists so the core
/// runs standalone and multi-node fan-out is exercisable in tests within a
/// single process (§8 S5).
#[derive(Debug, Default)]
pub struct LocalBus {
    channels: DashMap<String, broadcast::Sender<BusEnvelope>>,
}

impl LocalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<BusEnvelope> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, channel: &str, envelope: BusEnvelope) -> Result<(), BusError> {
        // No subscribers is not an error: a publish with nobody listening is
        // the common case right after a document's last subscriber leaves.
        let _ = self.sender_for(channel).send(envelope);
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = BusEnvelope> + Send>>, BusError> {
        let receiver = self.sender_for(channel).subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| item.ok());
        Ok(Box::pin(stream))
    }

    async fn unsubscribe(&self, _channel: &str) -> Result<(), BusError> {
        // Dropping the subscription stream is what actually unsubscribes a
        // `tokio::sync::broadcast::Receiver`; this is a no-op hook kept for
        // parity with the `Bus` capability's interface (§6).
        Ok(())
    }
}

/// Prefixes a bare channel name with the deployment's bus namespace (§6
/// `bus channel prefix`), so one broker can carry multiple tenants without
/// cross-talk.
#[must_use]
pub fn namespaced_channel(prefix: &str, channel: &str) -> String {
    if prefix.is_empty() {
        channel.to_string()
    } else {
        format!("{prefix}:{channel}")
    }
}
