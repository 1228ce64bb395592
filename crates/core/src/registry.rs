//! Process-wide index of live connections (§4.3): by id, by authenticated
//! user, and by subscribed document. Copy-on-write subscriber snapshots so
//! broadcast never holds a registry lock across connection I/O (§5).

use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;
use sync_protocol::Frame;
use tracing::{debug, warn};

use crate::connection::{CloseCode, Connection};

/// Registration invariant violated: the id was already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection already registered")]
pub struct AlreadyRegistered;

/// Live-connection cap exceeded (§4.3 "Capacity").
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("registry at capacity")]
pub struct AtCapacity;

/// The three indexes over live connections (§4.3), plus a fourth index of
/// awareness-only subscribers (§4.6 `subscribe`) kept separately from the
/// document-sync index since a connection may watch one without the other.
#[derive(Default)]
pub struct ConnectionRegistry {
    by_id: DashMap<String, Arc<Connection>>,
    by_user: DashMap<String, HashSet<String>>,
    by_document: DashMap<String, HashSet<String>>,
    by_awareness_document: DashMap<String, HashSet<String>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// `true` iff accepting one more connection would exceed the configured
    /// cap (§4.3: new accepts are rejected with `policy-violation`
    /// immediately after handshake, before reaching the dispatcher).
    #[must_use]
    pub fn at_capacity(&self) -> bool {
        self.max_connections > 0 && self.by_id.len() >= self.max_connections
    }

    /// Register a newly-accepted connection.
    ///
    /// # Errors
    /// [`AlreadyRegistered`] if `conn.id` is already present (§4.3
    /// invariant); [`AtCapacity`] if the registry is full.
    pub fn register(&self, conn: Arc<Connection>) -> Result<(), RegisterError> {
        if self.at_capacity() {
            return Err(RegisterError::AtCapacity(AtCapacity));
        }
        if self.by_id.contains_key(&conn.id) {
            return Err(RegisterError::AlreadyRegistered(AlreadyRegistered));
        }
        self.by_id.insert(conn.id.clone(), conn);
        Ok(())
    }

    /// Remove a connection from every index. Idempotent.
    pub fn unregister(&self, id: &str) {
        let Some((_, conn)) = self.by_id.remove(id) else {
            return;
        };
        if let Some(subject) = conn.subject() {
            if let Some(mut ids) = self.by_user.get_mut(&subject.user_id) {
                ids.remove(id);
            }
        }
        for doc_id in conn.subscriptions() {
            if let Some(mut ids) = self.by_document.get_mut(&doc_id) {
                ids.remove(id);
            }
        }
        for doc_id in conn.awareness_subscriptions() {
            if let Some(mut ids) = self.by_awareness_document.get_mut(&doc_id) {
                ids.remove(id);
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.by_id.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Index a connection under its authenticated user id (called once AUTH
    /// succeeds).
    pub fn index_by_user(&self, user_id: &str, conn_id: &str) {
        self.by_user.entry(user_id.to_string()).or_default().insert(conn_id.to_string());
    }

    #[must_use]
    pub fn connections_of_user(&self, user_id: &str) -> HashSet<String> {
        self.by_user.get(user_id).map(|e| e.clone()).unwrap_or_default()
    }

    /// Subscribe `conn_id` to `doc_id` (§4.3 `subscribe`).
    pub fn subscribe(&self, conn_id: &str, doc_id: &str) {
        if let Some(conn) = self.get(conn_id) {
            conn.add_subscription(doc_id);
        }
        self.by_document.entry(doc_id.to_string()).or_default().insert(conn_id.to_string());
    }

    /// Unsubscribe `conn_id` from `doc_id` (§4.3 `unsubscribe`).
    pub fn unsubscribe(&self, conn_id: &str, doc_id: &str) {
        if let Some(conn) = self.get(conn_id) {
            conn.remove_subscription(doc_id);
        }
        if let Some(mut ids) = self.by_document.get_mut(doc_id) {
            ids.remove(conn_id);
        }
    }

    /// Snapshot of current subscriber ids for `doc_id` (§4.3
    /// `subscribersOf`) — a copy, safe to iterate while the registry mutates
    /// concurrently.
    #[must_use]
    pub fn subscribers_of(&self, doc_id: &str) -> HashSet<String> {
        self.by_document.get(doc_id).map(|e| e.clone()).unwrap_or_default()
    }

    /// Enqueue `message` on every current subscriber of `doc_id` except
    /// `exclude_conn_id` (§4.3 `broadcast`). Non-blocking: a subscriber
    /// whose send queue is full is closed with `slow consumer`, never
    /// stalling the fan-out of the rest.
    pub fn broadcast(&self, doc_id: &str, message: &Frame, exclude_conn_id: Option<&str>) {
        for conn_id in self.subscribers_of(doc_id) {
            if Some(conn_id.as_str()) == exclude_conn_id {
                continue;
            }
            let Some(conn) = self.get(&conn_id) else {
                // Stale index entry — the connection already unregistered.
                continue;
            };
            if conn.send(message.clone()).is_err() {
                warn!(conn_id = %conn_id, doc_id = %doc_id, "registry: slow consumer, closing");
                conn.close(CloseCode::PolicyViolation, "slow consumer");
            }
        }
    }

    /// Subscribe `conn_id` to `doc_id`'s awareness channel (§4.6 `subscribe`).
    pub fn subscribe_awareness(&self, conn_id: &str, doc_id: &str) {
        if let Some(conn) = self.get(conn_id) {
            conn.add_awareness_subscription(doc_id);
        }
        self.by_awareness_document
            .entry(doc_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    /// Unsubscribe `conn_id` from `doc_id`'s awareness channel.
    pub fn unsubscribe_awareness(&self, conn_id: &str, doc_id: &str) {
        if let Some(conn) = self.get(conn_id) {
            conn.remove_awareness_subscription(doc_id);
        }
        if let Some(mut ids) = self.by_awareness_document.get_mut(doc_id) {
            ids.remove(conn_id);
        }
    }

    #[must_use]
    pub fn awareness_subscribers_of(&self, doc_id: &str) -> HashSet<String> {
        self.by_awareness_document.get(doc_id).map(|e| e.clone()).unwrap_or_default()
    }

    /// Enqueue `message` on every current awareness subscriber of `doc_id`
    /// except `exclude_conn_id` (§4.6 broadcast, "identical in shape to the
    /// document broadcast path").
    pub fn broadcast_awareness(&self, doc_id: &str, message: &Frame, exclude_conn_id: Option<&str>) {
        for conn_id in self.awareness_subscribers_of(doc_id) {
            if Some(conn_id.as_str()) == exclude_conn_id {
                continue;
            }
            let Some(conn) = self.get(&conn_id) else {
                continue;
            };
            if conn.send(message.clone()).is_err() {
                warn!(conn_id = %conn_id, doc_id = %doc_id, "registry: slow consumer (awareness), closing");
                conn.close(CloseCode::PolicyViolation, "slow consumer");
            }
        }
    }

    /// Close and unregister every connection (§5 shutdown drain).
    pub fn close_all(&self, code: CloseCode, reason: &str) {
        let ids: Vec<String> = self.by_id.iter().map(|e| e.key().clone()).collect();
        debug!(count = ids.len(), "registry: closing all connections");
        for id in ids {
            if let Some(conn) = self.get(&id) {
                conn.close(code, reason.to_string());
            }
        }
    }
}

/// Failure registering a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error(transparent)]
    AlreadyRegistered(#[from] AlreadyRegistered),
    #[error(transparent)]
    AtCapacity(#[from] AtCapacity),
}
