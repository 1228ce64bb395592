//! Configuration validation: rejects out-of-range timeouts and non-positive
//! queue depths before they reach the running server.

use crate::schema::SyncConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "heartbeat.interval_ms".
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

/// Validate a [`SyncConfig`], returning every diagnostic found (not just the
/// first).
#[must_use]
pub fn validate(cfg: &SyncConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();

    if cfg.listen.addr.parse::<std::net::SocketAddr>().is_err() {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: "listen.addr".into(),
            message: format!("not a valid socket address: {}", cfg.listen.addr),
        });
    }

    if cfg.connections.max_connections == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: "connections.max_connections".into(),
            message: "must be positive".into(),
        });
    }
    if cfg.connections.send_queue_depth == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: "connections.send_queue_depth".into(),
            message: "must be positive".into(),
        });
    }

    if cfg.heartbeat.interval_ms == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: "heartbeat.interval_ms".into(),
            message: "must be positive".into(),
        });
    }
    if cfg.heartbeat.timeout_ms <= cfg.heartbeat.interval_ms {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: "heartbeat.timeout_ms".into(),
            message: "must exceed heartbeat.interval_ms, or every connection times out between beats".into(),
        });
    }

    if cfg.auth.timeout_ms == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: "auth.timeout_ms".into(),
            message: "must be positive".into(),
        });
    }
    if !cfg.auth.required {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path: "auth.required".into(),
            message: "disabled — all connections get implicit read+write-all".into(),
        });
    }

    if cfg.awareness.sweep_interval_ms == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: "awareness.sweep_interval_ms".into(),
            message: "must be positive".into(),
        });
    }
    if cfg.awareness.entry_timeout_ms <= cfg.awareness.sweep_interval_ms {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path: "awareness.entry_timeout_ms".into(),
            message: "shorter than the sweep interval — entries may expire before they're swept"
                .into(),
        });
    }

    if cfg.coordinator.queue_depth == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: "coordinator.queue_depth".into(),
            message: "must be positive".into(),
        });
    }

    if cfg.batching.enabled && cfg.batching.max_delay_ms > 50 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: "batching.max_delay_ms".into(),
            message: "must not exceed 50ms".into(),
        });
    }
    if cfg.batching.enabled && cfg.batching.max_batch_size == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: "batching.max_batch_size".into(),
            message: "must be positive when batching is enabled".into(),
        });
    }

    ValidationResult { diagnostics }
}
