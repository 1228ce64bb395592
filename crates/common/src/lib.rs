//! Shared error definitions and bootstrap utilities used across all sync-server crates.

pub mod error;
pub mod lww;
pub mod telemetry;

pub use {
    error::{Error, FromMessage, Result, SyncError},
    lww::{WriteKey, candidate_wins},
};
