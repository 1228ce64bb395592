//! Configuration loading, validation, and env substitution for the sync
//! server.
//!
//! Config files: `sync.toml`, `sync.yaml`, or `sync.json`.
//! Searched in `./` then `~/.config/sync-server/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, load_config},
    schema::{
        AuthConfig, AwarenessConfig, BatchingConfig, BusConfig, ConnectionsConfig,
        CoordinatorConfig, HeartbeatConfig, ListenConfig, SyncConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
