//! The realtime coordination core (§2): connection lifecycle, per-document
//! sync coordinator, awareness store, and the dispatcher that wires parsed
//! frames to the right handler. Everything here is transport-agnostic —
//! `sync-server` drives it against a real WebSocket; tests drive it
//! in-process against the capability traits' in-memory implementations.

pub mod awareness;
pub mod connection;
pub mod coordinator;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod registry;

pub use crate::{
    awareness::AwarenessStore,
    connection::{CloseCode, Connection, ConnectionState, Outbound, SlowConsumer},
    coordinator::{CoordinatorDeps, CoordinatorHandle, CoordinatorMap, CoordinatorMessage},
    dispatcher::Dispatcher,
    document::DocumentState,
    error::CoreError,
    registry::ConnectionRegistry,
};
