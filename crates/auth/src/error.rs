use thiserror::Error;

/// Why a credential failed to validate. Deliberately coarse — the wire-level
/// `auth_error` frame never distinguishes "expired" from "unknown token" to
/// avoid helping an attacker enumerate valid tokens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credential")]
    Invalid,

    #[error("credential expired")]
    Expired,
}
