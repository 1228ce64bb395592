//! Command-line surface for the `sync-server` binary.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "sync-server", about = "Realtime sync coordination server")]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "SYNC_LOG_LEVEL")]
    pub log_level: String,

    /// Output logs as JSON instead of human-readable text.
    #[arg(long, default_value_t = false, env = "SYNC_JSON_LOGS")]
    pub json_logs: bool,

    /// Address to bind to, overriding the config file's `listen.addr`.
    #[arg(long, env = "SYNC_BIND")]
    pub bind: Option<String>,

    /// Path to a config file, overriding the standard search path.
    #[arg(long, env = "SYNC_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// This node's id, used to tag bus envelopes for loop prevention (§4.7).
    /// Defaults to a random id if unset.
    #[arg(long, env = "SYNC_NODE_ID")]
    pub node_id: Option<String>,
}
