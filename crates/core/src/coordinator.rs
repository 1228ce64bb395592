//! Per-document serialization (§5): every mutation to a document — local
//! delta, remote delta arriving off the bus, or a sync request — is
//! processed one at a time by that document's [`SyncCoordinator`] actor, so
//! the LWW merge never races with itself.

use std::{collections::HashMap, sync::Arc, time::Duration};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sync_capabilities::{Bus, BusEnvelope, Clock, DocumentStore};
use sync_protocol::{
    DeltaFrame, Frame, FrameBody, SyncResponseFrame, VectorClock, FieldValue,
};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

use crate::{document::DocumentState, registry::ConnectionRegistry};

/// Bounded backoff schedule for persistence retries (§4.4.b: "the server
/// retries with bounded backoff before giving up and reporting
/// `StoreUnavailable`").
const PERSIST_RETRY_DELAYS_MS: [u64; 3] = [20, 80, 250];

/// Wire shape of a document delta published on the `doc:{docId}` bus channel
/// (§4.7). Carries the whole `Frame` — not just the `delta` frame body — so
/// the receiving node gets the originating `timestamp` the LWW triple needs
/// (timestamp lives on `Frame`, not on `FrameBody`), plus the originating
/// client id explicitly rather than guessing it from `remote_clock`'s
/// (unordered) keys.
#[derive(Serialize, Deserialize)]
struct DocDeltaEnvelope {
    frame: Frame,
    writer_id: String,
}

/// Work items a document's coordinator serializes (§5).
pub enum CoordinatorMessage {
    /// A delta from a directly-connected client.
    LocalDelta {
        conn_id: String,
        message_id: String,
        delta: HashMap<String, FieldValue>,
        remote_clock: VectorClock,
        writer_id: String,
        timestamp_ms: i64,
    },
    /// A delta that another node already applied and republished on the
    /// bus (§4.7) — merged locally but never re-published.
    RemoteDelta {
        delta: HashMap<String, FieldValue>,
        remote_clock: VectorClock,
        writer_id: String,
        timestamp_ms: i64,
    },
    SyncRequest {
        conn_id: String,
        message_id: String,
        sender_clock: VectorClock,
    },
    Shutdown,
}

/// A cheaply-cloneable handle to a running coordinator's inbox. `try_send`
/// only — a full queue means the document is overloaded and the caller
/// reports `CoordinatorBusy` rather than waiting (§4.3, §7).
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorMessage>,
}

impl CoordinatorHandle {
    pub fn try_send(&self, message: CoordinatorMessage) -> Result<(), CoordinatorMessage> {
        self.tx.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(msg) | mpsc::error::TrySendError::Closed(msg) => msg,
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct SyncCoordinator {
    doc_id: String,
    node_id: String,
    state: DocumentState,
    store: Arc<dyn DocumentStore>,
    bus: Arc<dyn Bus>,
    bus_channel: String,
    clock: Arc<dyn Clock>,
    registry: Arc<ConnectionRegistry>,
}

impl SyncCoordinator {
    async fn run(mut self, mut inbox: mpsc::Receiver<CoordinatorMessage>) {
        let mut bus_stream = match self.bus.subscribe(&self.bus_channel).await {
            Ok(stream) => stream,
            Err(err) => {
                error!(doc_id = %self.doc_id, error = %err, "coordinator: bus subscribe failed, running without remote fan-in");
                Box::pin(tokio_stream::empty())
            },
        };

        let snapshot = match self.store.load(&self.doc_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(doc_id = %self.doc_id, error = %err, "coordinator: load failed, starting empty");
                sync_capabilities::DocumentSnapshot::default()
            },
        };
        self.state = DocumentState::from_snapshot(self.doc_id.clone(), snapshot);

        loop {
            tokio::select! {
                biased;
                message = inbox.recv() => {
                    match message {
                        Some(CoordinatorMessage::Shutdown) | None => break,
                        Some(message) => self.handle(message).await,
                    }
                }
                envelope = bus_stream.next() => {
                    let Some(envelope) = envelope else { continue };
                    if envelope.origin_node_id == self.node_id {
                        // Our own publish, echoed back by the bus; drop it (§4.7).
                        continue;
                    }
                    self.handle_remote_envelope(envelope).await;
                }
            }
        }
        debug!(doc_id = %self.doc_id, "coordinator: shutting down");
    }

    async fn handle(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::LocalDelta {
                conn_id,
                message_id,
                delta,
                remote_clock,
                writer_id,
                timestamp_ms,
            } => {
                let persisted =
                    self.apply_and_fan_out(delta, &remote_clock, &writer_id, timestamp_ms, true, Some(&conn_id)).await;
                // §4.4.b/§7 StoreUnavailable: the originator is not acked until
                // persistence succeeds; on exhausted retries the in-memory
                // fan-out has already happened (state is authoritative) but the
                // originator is closed with server-error instead.
                if persisted {
                    self.ack(&conn_id, &message_id);
                } else {
                    self.close_originator(&conn_id);
                }
            },
            CoordinatorMessage::RemoteDelta { delta, remote_clock, writer_id, timestamp_ms } => {
                self.apply_and_fan_out(delta, &remote_clock, &writer_id, timestamp_ms, false, None).await;
            },
            CoordinatorMessage::SyncRequest { conn_id, message_id, sender_clock } => {
                self.reply_sync_response(&conn_id, &message_id, &sender_clock);
            },
            CoordinatorMessage::Shutdown => {},
        }
    }

    async fn handle_remote_envelope(&mut self, envelope: BusEnvelope) {
        let Ok(DocDeltaEnvelope { frame, writer_id }) = serde_json::from_value::<DocDeltaEnvelope>(envelope.payload)
        else {
            warn!(doc_id = %self.doc_id, "coordinator: malformed bus envelope, dropping");
            return;
        };
        let FrameBody::Delta(delta) = frame.body else {
            warn!(doc_id = %self.doc_id, "coordinator: bus envelope was not a delta frame, dropping");
            return;
        };
        // The originating node's timestamp and writer id travel verbatim so
        // the LWW triple this node computes matches the one node A already
        // applied (§8 invariant 7: convergence).
        self.apply_and_fan_out(delta.delta, &delta.remote_clock, &writer_id, frame.timestamp, false, None).await;
    }

    /// Merge a delta into document state, persist it, and fan it out (§4.4
    /// steps b-d). `origin_conn_id` is the directly-connected client this
    /// delta came from, if any — excluded from the broadcast since it
    /// already has the value it just sent (§4.4.c), and `None` for deltas
    /// arriving from the bus or another node, which have no local
    /// originator to exclude. `republish` gates whether the result is
    /// re-published to the bus: `true` only for deltas that originated on
    /// this node, so a remote node's own publish is never echoed back to it
    /// (§4.7 loop prevention).
    /// Returns `true` if the batch either had nothing to persist or
    /// persisted successfully; `false` only when retries were exhausted
    /// (§4.4.b), in which case the caller must not ack the originator.
    async fn apply_and_fan_out(
        &mut self,
        delta: HashMap<String, FieldValue>,
        remote_clock: &VectorClock,
        writer_id: &str,
        timestamp_ms: i64,
        republish: bool,
        origin_conn_id: Option<&str>,
    ) -> bool {
        let timestamp_ms = if timestamp_ms == 0 { self.clock.now_ms() } else { timestamp_ms };
        let winners = self.state.apply_delta(delta.clone(), remote_clock, writer_id, timestamp_ms, &self.node_id);
        if winners.is_empty() {
            return true;
        }

        let wire_fields: HashMap<_, _> = winners.iter().map(|(path, record)| (path.clone(), record.to_wire())).collect();
        let persisted = self.persist_with_retry(wire_fields.clone()).await;

        // §4.4.c: the fan-out is a `delta` frame, not a `sync_response` —
        // only the winning field values plus the document's current vector
        // clock, excluding the originator (it already has the value it sent).
        let winning_values: HashMap<_, _> = winners.iter().map(|(path, record)| (path.clone(), record.value.clone())).collect();
        let delta_frame = DeltaFrame {
            id: uuid::Uuid::new_v4().to_string(),
            doc_id: self.doc_id.clone(),
            delta: winning_values,
            remote_clock: self.state.vector_clock(),
        };
        let broadcast = Frame::new(timestamp_ms, FrameBody::Delta(delta_frame));
        self.registry.broadcast(&self.doc_id, &broadcast, origin_conn_id);

        if republish {
            // Carry the original `Frame` (its `timestamp`) and the
            // originating client id explicitly, so node B reconstructs the
            // identical `(timestamp, clock, writer_id)` triple node A already
            // applied (§4.7, §8 invariant 7).
            let republish_frame = Frame::new(
                timestamp_ms,
                FrameBody::Delta(DeltaFrame {
                    id: uuid::Uuid::new_v4().to_string(),
                    doc_id: self.doc_id.clone(),
                    delta,
                    remote_clock: remote_clock.clone(),
                }),
            );
            let envelope = BusEnvelope {
                origin_node_id: self.node_id.clone(),
                channel: self.bus_channel.clone(),
                payload: serde_json::json!(DocDeltaEnvelope { frame: republish_frame, writer_id: writer_id.to_string() }),
            };
            if let Err(err) = self.bus.publish(&self.bus_channel, envelope).await {
                warn!(doc_id = %self.doc_id, error = %err, "coordinator: bus publish failed");
            }
        }

        persisted
    }

    async fn persist_with_retry(&self, fields: HashMap<String, sync_protocol::FieldRecordWire>) -> bool {
        let vector_clock = self.state.vector_clock();
        let mut attempt = 0usize;
        loop {
            match self.store.apply_delta(&self.doc_id, fields.clone(), vector_clock.clone()).await {
                Ok(()) => return true,
                Err(err) if attempt < PERSIST_RETRY_DELAYS_MS.len() => {
                    warn!(doc_id = %self.doc_id, attempt, error = %err, "coordinator: persist failed, retrying");
                    tokio::time::sleep(Duration::from_millis(PERSIST_RETRY_DELAYS_MS[attempt])).await;
                    attempt += 1;
                },
                Err(err) => {
                    error!(doc_id = %self.doc_id, error = %err, "coordinator: persist retries exhausted");
                    return false;
                },
            }
        }
    }

    /// §4.4.b / §7 `StoreUnavailable`: close the originating connection with
    /// `server-error` if it is still around; a connection that already
    /// disconnected is simply skipped.
    fn close_originator(&self, conn_id: &str) {
        let Some(conn) = self.registry.get(conn_id) else { return };
        conn.close(crate::connection::CloseCode::ServerError, "document store unavailable");
    }

    fn reply_sync_response(&self, conn_id: &str, message_id: &str, sender_clock: &VectorClock) {
        let Some(conn) = self.registry.get(conn_id) else { return };
        let fields = self.state.fields_since(sender_clock);
        let frame = Frame::new(
            self.clock.now_ms(),
            FrameBody::SyncResponse(SyncResponseFrame {
                id: message_id.to_string(),
                doc_id: self.doc_id.clone(),
                fields,
                vector_clock: self.state.vector_clock(),
            }),
        );
        let _ = conn.send(frame);
    }

    fn ack(&self, conn_id: &str, message_id: &str) {
        let Some(conn) = self.registry.get(conn_id) else { return };
        let frame = Frame::new(self.clock.now_ms(), FrameBody::Ack(sync_protocol::AckFrame { id: message_id.to_string() }));
        let _ = conn.send(frame);
    }
}

/// Dependencies every coordinator needs, bundled so [`CoordinatorMap`]
/// doesn't have to take five constructor arguments at every call site.
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub node_id: String,
    pub store: Arc<dyn DocumentStore>,
    pub bus: Arc<dyn Bus>,
    pub bus_channel_prefix: String,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<ConnectionRegistry>,
    pub queue_depth: usize,
}

/// Lazily spawns and reaps per-document coordinator tasks (§5: "coordinators
/// are created on first subscribe/delta and torn down once idle with no
/// subscribers").
#[derive(Default)]
pub struct CoordinatorMap {
    handles: DashMap<String, CoordinatorHandle>,
}

impl CoordinatorMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handle for `doc_id`, spawning a fresh coordinator if none is
    /// running (or the previous one has already exited).
    pub fn get_or_spawn(&self, doc_id: &str, deps: &CoordinatorDeps) -> CoordinatorHandle {
        if let Some(handle) = self.handles.get(doc_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        let (tx, rx) = mpsc::channel(deps.queue_depth.max(1));
        let handle = CoordinatorHandle { tx };
        let coordinator = SyncCoordinator {
            doc_id: doc_id.to_string(),
            node_id: deps.node_id.clone(),
            state: DocumentState::new(doc_id.to_string()),
            store: Arc::clone(&deps.store),
            bus: Arc::clone(&deps.bus),
            bus_channel: sync_capabilities::namespaced_channel(&deps.bus_channel_prefix, &format!("doc:{doc_id}")),
            clock: Arc::clone(&deps.clock),
            registry: Arc::clone(&deps.registry),
        };
        tokio::spawn(coordinator.run(rx));
        self.handles.insert(doc_id.to_string(), handle.clone());
        handle
    }

    /// Ask every running coordinator to stop after draining its queue (§5
    /// graceful shutdown).
    pub fn shutdown_all(&self) {
        for entry in self.handles.iter() {
            let _ = entry.value().try_send(CoordinatorMessage::Shutdown);
        }
    }

    /// Drop the map's handle to `doc_id`'s coordinator, if present (§4.4
    /// "the coordinator may flush to storage and unload after a grace
    /// period" once its subscriber set is empty). A stale send to the
    /// removed handle is harmless: `CoordinatorHandle::is_closed` makes
    /// `get_or_spawn` respawn on the next access.
    pub fn remove(&self, doc_id: &str) {
        self.handles.remove(doc_id);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use sync_capabilities::{DocumentSnapshot, LocalBus, StoreError, SystemClock};

    use super::*;
    use crate::connection::{CloseCode, Connection, ConnectionState, Outbound};

    /// A `DocumentStore` that never persists, so the retry schedule always
    /// exhausts (§4.4.b, §7 `StoreUnavailable`).
    #[derive(Default)]
    struct AlwaysFailingStore;

    #[async_trait]
    impl DocumentStore for AlwaysFailingStore {
        async fn load(&self, _doc_id: &str) -> Result<DocumentSnapshot, StoreError> {
            Ok(DocumentSnapshot::default())
        }

        async fn apply_delta(
            &self,
            _doc_id: &str,
            _fields: HashMap<String, sync_protocol::FieldRecordWire>,
            _vector_clock: VectorClock,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }

        async fn list_documents(&self) -> Result<Vec<String>, StoreError> {
            Ok(vec![])
        }
    }

    fn deps(registry: &Arc<ConnectionRegistry>, store: Arc<dyn DocumentStore>) -> CoordinatorDeps {
        CoordinatorDeps {
            node_id: "node-a".into(),
            store,
            bus: Arc::new(LocalBus::new()),
            bus_channel_prefix: "sync".into(),
            clock: Arc::new(SystemClock),
            registry: Arc::clone(registry),
            queue_depth: 16,
        }
    }

    #[tokio::test]
    async fn exhausted_persist_retries_close_originator_instead_of_acking() {
        let registry = Arc::new(ConnectionRegistry::new(100));
        let (conn, mut rx) = Connection::new("c1".into(), 16);
        conn.set_state(ConnectionState::Authenticated);
        let conn = Arc::new(conn);
        registry.register(Arc::clone(&conn)).expect("register");
        registry.subscribe(&conn.id, "doc-1");

        let deps = deps(&registry, Arc::new(AlwaysFailingStore));
        let map = CoordinatorMap::new();
        let handle = map.get_or_spawn("doc-1", &deps);

        let mut delta = HashMap::new();
        delta.insert("title".to_string(), FieldValue::Value(serde_json::json!("x")));
        handle
            .try_send(CoordinatorMessage::LocalDelta {
                conn_id: conn.id.clone(),
                message_id: "m1".into(),
                delta,
                remote_clock: VectorClock::from([("alice".to_string(), 1)]),
                writer_id: "alice".into(),
                timestamp_ms: 100,
            })
            .expect("queue has room");

        // The document broadcast lands quickly; the close instruction follows
        // once the bounded retry schedule (20+80+250ms) is exhausted.
        let broadcast = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("broadcast arrives")
            .expect("channel open");
        match broadcast {
            Outbound::Frame(f) => assert!(matches!(f.body, FrameBody::Delta(_))),
            Outbound::Close(..) => panic!("expected the delta broadcast before the close"),
        }

        let next = tokio::time::timeout(Duration::from_millis(1000), rx.recv())
            .await
            .expect("close arrives")
            .expect("channel open");
        match next {
            Outbound::Close(code, _) => assert_eq!(code.as_u16(), CloseCode::ServerError.as_u16()),
            Outbound::Frame(f) => panic!("expected server-error close, got {f:?} (ack must not be sent)"),
        }
    }
}
