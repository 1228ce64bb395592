//! Graceful shutdown (§5): on Ctrl-C, stop accepting new coordinator work,
//! drain every per-document coordinator, and close every live connection
//! with `going away` before the process exits.

use sync_core::CloseCode;
use tracing::info;

use crate::state::AppState;

/// Future that resolves once Ctrl-C is received and the connected world has
/// been told to go away. Pass the result to `axum::serve(...).with_graceful_shutdown(..)`.
pub async fn wait_for_shutdown_signal(state: AppState) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("shutdown: signal received, draining connections");
    state.registry.close_all(CloseCode::GoingAway, "server shutting down");
    state.coordinators.shutdown_all();
}
