//! Configuration schema for the sync server: every row of the external
//! configuration table the core honors, and nothing else.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub listen: ListenConfig,
    pub connections: ConnectionsConfig,
    pub heartbeat: HeartbeatConfig,
    pub auth: AuthConfig,
    pub awareness: AwarenessConfig,
    pub coordinator: CoordinatorConfig,
    pub batching: BatchingConfig,
    pub bus: BusConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            connections: ConnectionsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            auth: AuthConfig::default(),
            awareness: AwarenessConfig::default(),
            coordinator: CoordinatorConfig::default(),
            batching: BatchingConfig::default(),
            bus: BusConfig::default(),
        }
    }
}

/// Ingress bind address for the single WebSocket endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub addr: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Registry-wide connection accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    /// Registry cap; accepts beyond this are rejected.
    pub max_connections: usize,
    /// Per-connection outbound (send) queue depth.
    pub send_queue_depth: usize,
    /// Maximum accepted frame size, absent a transport-level override
    /// (§4.1 "Payload size").
    pub max_payload_bytes: usize,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            send_queue_depth: 256,
            max_payload_bytes: sync_protocol::DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Heartbeat cadence and liveness timeout (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            timeout_ms: 45_000,
        }
    }
}

/// Authentication behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// When false, every connection is implicitly authorized with
    /// read+write-all and the AUTH handshake is skipped.
    pub required: bool,
    /// Time allotted for AUTH before the connection is closed.
    pub timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: true,
            timeout_ms: 10_000,
        }
    }
}

/// Ephemeral presence/awareness bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwarenessConfig {
    /// Entry expiry window since the last update.
    pub entry_timeout_ms: u64,
    /// Period of the background expiry sweep.
    pub sweep_interval_ms: u64,
}

impl Default for AwarenessConfig {
    fn default() -> Self {
        Self {
            entry_timeout_ms: 30_000,
            sweep_interval_ms: 10_000,
        }
    }
}

/// Per-document sync coordinator sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Per-document input channel capacity.
    pub queue_depth: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { queue_depth: 1024 }
    }
}

/// Optional server-side coalescing of delta broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub enabled: bool,
    pub max_batch_size: usize,
    /// Maximum coalescing delay; the spec bounds this to 50ms.
    pub max_delay_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_batch_size: 32,
            max_delay_ms: 50,
        }
    }
}

/// Cross-node pub/sub channel namespacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Prefixed onto every channel name; lets one bus carry multiple
    /// tenants without cross-talk.
    pub channel_prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "sync".to_string(),
        }
    }
}
