//! Structured logging bootstrap shared by the sync server binary (and its
//! tests, where a quieter init is useful).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global `tracing` subscriber.
///
/// The filter is read from `RUST_LOG` when set, falling back to `default_level`
/// otherwise. `json` selects the structured JSON formatter used in production;
/// the pretty formatter is meant for local development.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        let _ = registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .try_init();
    } else {
        let _ = registry.with(fmt::layer().with_target(true)).try_init();
    }
}
