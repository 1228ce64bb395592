use thiserror::Error;

/// A frame failed to parse. Carries enough context for a `protocol-error`
/// close, never a panic — adversarial input is expected on this path.
#[derive(Debug, Error)]
pub enum MalformedFrame {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("binary frame too short: need at least {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },

    #[error("unknown kind code: 0x{code:02X}")]
    UnknownKind { code: u8 },

    #[error("declared payload length {declared} exceeds available bytes {available}")]
    PayloadLengthMismatch { declared: u32, available: usize },

    #[error("payload is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}
