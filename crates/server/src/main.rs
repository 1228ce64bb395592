//! Process bootstrap for `sync-server` (§1 "Process bootstrap, config
//! loading, health endpoints, deployment, CLI" — explicitly outside the
//! core, wired here): parse the CLI, load config, assemble the capability
//! implementations and the coordination core on top of them, and serve the
//! single WebSocket ingress endpoint until told to shut down.

mod awareness_sweep;
mod cli;
mod routes;
mod shutdown;
mod state;
mod ws;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use sync_auth::{AuthGuard, StaticTokenValidator};
use sync_capabilities::{Clock, InMemoryDocumentStore, LocalBus, SystemClock};
use sync_core::{AwarenessStore, ConnectionRegistry, CoordinatorDeps, CoordinatorMap, Dispatcher};

use crate::{cli::Cli, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    sync_common::telemetry::init_tracing(&cli.log_level, cli.json_logs);

    let config = Arc::new(match &cli.config_file {
        Some(path) => sync_config::load_config(path)?,
        None => sync_config::discover_and_load(),
    });
    let diagnostics = sync_config::validate(&config);
    for diagnostic in &diagnostics.diagnostics {
        match diagnostic.severity {
            sync_config::Severity::Error => {
                tracing::error!(path = %diagnostic.path, "{}", diagnostic.message);
            },
            sync_config::Severity::Warning => {
                tracing::warn!(path = %diagnostic.path, "{}", diagnostic.message);
            },
        }
    }
    if diagnostics.has_errors() {
        anyhow::bail!("invalid configuration, refusing to start");
    }

    let bind_addr: SocketAddr = cli
        .bind
        .as_deref()
        .unwrap_or(&config.listen.addr)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;
    let node_id: Arc<str> = Arc::from(cli.node_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()));

    // Out-of-scope capabilities (§1, §6): a real deployment swaps these for
    // a durable store, a Redis-like broker, and a real identity service.
    // The in-memory stand-ins here are what let this binary run standalone.
    let store = Arc::new(InMemoryDocumentStore::new());
    let bus: Arc<dyn sync_capabilities::Bus> = Arc::new(LocalBus::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let validator = Arc::new(StaticTokenValidator::new());

    let registry = Arc::new(ConnectionRegistry::new(config.connections.max_connections));
    let coordinators = Arc::new(CoordinatorMap::new());
    let awareness = Arc::new(AwarenessStore::new(
        i64::try_from(config.awareness.entry_timeout_ms).unwrap_or(i64::MAX),
        config.awareness.sweep_interval_ms,
    ));
    let auth = AuthGuard::new(validator, config.auth.required);
    let coordinator_deps = CoordinatorDeps {
        node_id: node_id.to_string(),
        store,
        bus: Arc::clone(&bus),
        bus_channel_prefix: config.bus.channel_prefix.clone(),
        clock: Arc::clone(&clock),
        registry: Arc::clone(&registry),
        queue_depth: config.coordinator.queue_depth,
    };
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        auth.clone(),
        Arc::clone(&coordinators),
        coordinator_deps,
        Arc::clone(&awareness),
        bus,
        config.bus.channel_prefix.clone(),
        Arc::clone(&clock),
    ));

    let state = AppState {
        config: Arc::clone(&config),
        registry,
        coordinators,
        awareness,
        dispatcher,
        auth,
        clock,
        node_id,
    };

    tokio::spawn(awareness_sweep::run(state.clone()));

    let app = Router::new()
        .route("/health", get(routes::health_handler))
        .route("/ws", get(routes::ws_upgrade_handler))
        .route("/auth/login", post(routes::auth_login_stub))
        .route("/auth/refresh", post(routes::auth_refresh_stub))
        .route("/auth/me", get(routes::auth_me_handler))
        .route("/auth/verify", get(routes::auth_verify_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state.clone());

    tracing::info!(addr = %bind_addr, node_id = %state.node_id, "sync-server: listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown::wait_for_shutdown_signal(state))
        .await?;

    Ok(())
}
