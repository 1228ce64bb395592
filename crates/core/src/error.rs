//! The coordination core's error taxonomy (§7) — kinds, not type names. Each
//! variant maps to a documented propagation policy: a wire-level `error` /
//! `auth_error` frame, a connection close with a specific [`CloseCode`], or
//! internal recovery that never reaches an unrelated connection.

use thiserror::Error;

use crate::connection::CloseCode;

/// A core-level failure, tagged with how it should be propagated.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    /// Codec failure. Connection-fatal: close with `protocol-error`.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Read/write attempted before AUTH. Reply-only, connection survives.
    #[error("not authenticated")]
    Unauthenticated,

    /// Read or write rejected by the auth guard. Reply-only.
    #[error("permission denied for document {doc_id}")]
    PermissionDenied { doc_id: String },

    /// The `auth` frame's credentials did not validate.
    #[error("authentication failed")]
    AuthFailed,

    /// No AUTH frame arrived within the configured window.
    #[error("authentication timeout")]
    AuthTimeout,

    /// Send queue overflowed.
    #[error("slow consumer")]
    SlowConsumer,

    /// A per-document coordinator's input queue was full.
    #[error("coordinator busy for document {doc_id}")]
    CoordinatorBusy { doc_id: String },

    /// Persistence failed after retries were exhausted.
    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),

    /// Bus publish/subscribe failed; non-fatal, logged only.
    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    /// Graceful shutdown in progress; new work is declined.
    #[error("server shutting down")]
    Shutdown,
}

impl CoreError {
    /// The close code a connection-fatal variant maps onto (§4.2, §7). Not
    /// every variant is connection-fatal — see [`CoreError::is_fatal`].
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            CoreError::MalformedFrame(_) => CloseCode::ProtocolError,
            CoreError::AuthFailed | CoreError::AuthTimeout => CloseCode::PolicyViolation,
            CoreError::SlowConsumer => CloseCode::PolicyViolation,
            CoreError::CoordinatorBusy { .. } => CloseCode::ServerBusy,
            CoreError::Shutdown => CloseCode::GoingAway,
            CoreError::StoreUnavailable(_) => CloseCode::ServerError,
            // Unauthenticated / PermissionDenied / BusUnavailable never close
            // a connection; callers should not reach here for those.
            CoreError::Unauthenticated
            | CoreError::PermissionDenied { .. }
            | CoreError::BusUnavailable(_) => CloseCode::ServerError,
        }
    }

    /// `true` for variants whose propagation policy is "close the
    /// connection" rather than "reply with an error frame and continue".
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::MalformedFrame(_)
                | CoreError::AuthFailed
                | CoreError::AuthTimeout
                | CoreError::SlowConsumer
                | CoreError::CoordinatorBusy { .. }
                | CoreError::Shutdown
                | CoreError::StoreUnavailable(_)
        )
    }

    /// The wire-level error code carried on an `error` frame for non-fatal
    /// variants.
    #[must_use]
    pub fn wire_code(&self) -> &'static str {
        match self {
            CoreError::Unauthenticated => "UNAUTHENTICATED",
            CoreError::PermissionDenied { .. } => "PERMISSION_DENIED",
            CoreError::BusUnavailable(_) => "BUS_UNAVAILABLE",
            _ => "INTERNAL",
        }
    }
}
