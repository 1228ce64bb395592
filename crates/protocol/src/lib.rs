//! Wire protocol for the sync server.
//!
//! Two interchangeable encodings carry the same message set: a textual JSON
//! encoding and a length-prefixed binary encoding. The first frame on a
//! connection fixes which encoding is used for the rest of its lifetime —
//! see [`detect_format`].

mod binary;
mod error;
mod frames;
mod textual;

pub use crate::{
    binary::{parse_binary, serialize_binary},
    error::MalformedFrame,
    frames::*,
    textual::{parse_textual, serialize_textual},
};

/// Default maximum payload size per frame (1 MiB), absent an explicit
/// transport-level negotiation.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Which of the two wire encodings a connection has negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Textual,
    Binary,
}

/// Inspect the first non-whitespace byte to decide which encoding a frame
/// uses. Textual frames are JSON objects and always start with `{` (0x7B);
/// anything else is assumed binary.
#[must_use]
pub fn detect_format(bytes: &[u8]) -> WireFormat {
    match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(0x7B) => WireFormat::Textual,
        _ => WireFormat::Binary,
    }
}

/// Parse a frame, dispatching to the textual or binary codec as appropriate.
pub fn parse(bytes: &[u8], format: WireFormat) -> Result<Frame, MalformedFrame> {
    match format {
        WireFormat::Textual => textual::parse_textual(bytes),
        WireFormat::Binary => binary::parse_binary(bytes),
    }
}

/// Serialize a frame in the given encoding.
pub fn serialize(frame: &Frame, format: WireFormat) -> Vec<u8> {
    match format {
        WireFormat::Textual => textual::serialize_textual(frame).into_bytes(),
        WireFormat::Binary => binary::serialize_binary(frame),
    }
}
