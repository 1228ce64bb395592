//! Process-wide shared state handed to every axum handler (§6 capability
//! wiring): the registry, coordinator map, awareness store, auth guard, and
//! the dispatcher that ties them together for one connection's frames.

use std::sync::Arc;

use sync_auth::AuthGuard;
use sync_capabilities::Clock;
use sync_config::SyncConfig;
use sync_core::{AwarenessStore, ConnectionRegistry, CoordinatorMap, Dispatcher};

/// Shared application state. Cloning is cheap — every field is an `Arc` (or
/// `AuthGuard`, itself cheaply-cloneable) — so axum can hand a copy to every
/// handler and connection task without contention.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SyncConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub coordinators: Arc<CoordinatorMap>,
    pub awareness: Arc<AwarenessStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub auth: AuthGuard,
    pub clock: Arc<dyn Clock>,
    pub node_id: Arc<str>,
}
