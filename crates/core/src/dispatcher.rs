//! Maps an authenticated, parsed frame to the right handler (§4.5). The
//! dispatcher is the only component that knows the full routing table; it
//! never blocks waiting on a coordinator — `CoordinatorMessage`s are handed
//! off with `try_send` and a full queue surfaces as [`CoreError::CoordinatorBusy`].

use std::sync::Arc;

use sync_auth::AuthGuard;
use sync_capabilities::{Bus, BusEnvelope, Clock};
use sync_protocol::{
    AuthErrorFrame, AuthSuccessFrame, AwarenessStateFrame, AwarenessSubscribeFrame,
    AwarenessUpdateFrame, DeltaFrame, ErrorFrame, Frame, FrameBody, PermissionsWire, PongFrame,
    SubscribeFrame, SyncRequestFrame, UnsubscribeFrame,
};
use tracing::{debug, warn};

use crate::{
    awareness::AwarenessStore,
    connection::{Connection, ConnectionState},
    coordinator::{CoordinatorDeps, CoordinatorMap, CoordinatorMessage},
    error::CoreError,
    registry::ConnectionRegistry,
};

/// Dependencies the dispatcher needs to route every frame kind in §4.5's
/// table, bundled the way [`CoordinatorDeps`] bundles a coordinator's.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    auth: AuthGuard,
    coordinators: Arc<CoordinatorMap>,
    coordinator_deps: CoordinatorDeps,
    awareness: Arc<AwarenessStore>,
    bus: Arc<dyn Bus>,
    bus_channel_prefix: String,
    clock: Arc<dyn Clock>,
    /// Documents whose `awareness:{docId}` bus channel already has a
    /// relay task running (§4.7 bus adapter, awareness side).
    awareness_relays: dashmap::DashSet<String>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        auth: AuthGuard,
        coordinators: Arc<CoordinatorMap>,
        coordinator_deps: CoordinatorDeps,
        awareness: Arc<AwarenessStore>,
        bus: Arc<dyn Bus>,
        bus_channel_prefix: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            auth,
            coordinators,
            coordinator_deps,
            awareness,
            bus,
            bus_channel_prefix,
            clock,
            awareness_relays: dashmap::DashSet::new(),
        }
    }

    /// Route one parsed frame for `conn` (§4.5). Connection-fatal errors are
    /// returned for the caller to close the transport with the right close
    /// code; every other failure mode replies in-band and returns `Ok(())`.
    pub async fn dispatch(&self, conn: &Arc<Connection>, frame: Frame) -> Result<(), CoreError> {
        let now_ms = self.clock.now_ms();
        match frame.body {
            FrameBody::Auth(auth) => {
                if conn.state() != ConnectionState::Authenticating {
                    self.reply_error(conn, &auth.id, "UNEXPECTED_AUTH", "already authenticated");
                    return Ok(());
                }
                match self
                    .auth
                    .authenticate(auth.token.as_deref(), auth.api_key.as_deref())
                    .await
                {
                    Ok(subject) => {
                        self.registry.index_by_user(&subject.user_id, &conn.id);
                        let permissions = PermissionsWire {
                            can_read: subject.permissions.can_read.clone(),
                            can_write: subject.permissions.can_write.clone(),
                            is_admin: subject.permissions.is_admin,
                        };
                        let user_id = subject.user_id.clone();
                        conn.set_subject(subject);
                        conn.set_state(ConnectionState::Authenticated);
                        let _ = conn.send(Frame::new(
                            now_ms,
                            FrameBody::AuthSuccess(AuthSuccessFrame {
                                id: auth.id,
                                user_id,
                                permissions,
                            }),
                        ));
                        Ok(())
                    },
                    Err(_) => {
                        let _ = conn.send(Frame::new(
                            now_ms,
                            FrameBody::AuthError(AuthErrorFrame {
                                id: auth.id,
                                code: "AUTH_FAILED".into(),
                                message: "invalid credentials".into(),
                            }),
                        ));
                        Err(CoreError::AuthFailed)
                    },
                }
            },

            FrameBody::Ping(ping) => {
                if !conn.is_authenticated() {
                    self.reply_unauthenticated(conn, &ping.id);
                    return Ok(());
                }
                let _ = conn.send(Frame::new(now_ms, FrameBody::Pong(PongFrame { id: ping.id })));
                Ok(())
            },

            // Pongs only reset the heartbeat timeout; the transport layer
            // already does that for every inbound frame (§4.2's
            // generalization — see SPEC_FULL §10 open questions), so there
            // is nothing left to do here.
            FrameBody::Pong(_) => Ok(()),

            FrameBody::Subscribe(subscribe) => self.handle_subscribe(conn, subscribe, now_ms),
            FrameBody::Unsubscribe(unsubscribe) => self.handle_unsubscribe(conn, unsubscribe),
            FrameBody::SyncRequest(req) => self.handle_sync_request(conn, req),
            FrameBody::Delta(delta) => self.handle_delta(conn, delta, frame.timestamp),
            FrameBody::AwarenessSubscribe(sub) => self.handle_awareness_subscribe(conn, sub, now_ms),
            FrameBody::AwarenessUpdate(update) => self.handle_awareness_update(conn, update, now_ms).await,

            // Server-to-client-only kinds arriving inbound are routing
            // errors, not protocol violations worth a connection close.
            other => {
                self.reply_error(
                    conn,
                    other.message_id(),
                    "UNEXPECTED_KIND",
                    &format!("'{}' is not a client-initiated message", other.kind_name()),
                );
                Ok(())
            },
        }
    }

    fn handle_subscribe(&self, conn: &Arc<Connection>, frame: SubscribeFrame, now_ms: i64) -> Result<(), CoreError> {
        let Some(subject) = conn.subject() else {
            self.reply_unauthenticated(conn, &frame.id);
            return Ok(());
        };
        if !self.auth.can_read(&subject, &frame.doc_id, now_ms) {
            self.reply_permission_denied(conn, &frame.id, &frame.doc_id);
            return Ok(());
        }
        self.registry.subscribe(&conn.id, &frame.doc_id);
        let handle = self.coordinators.get_or_spawn(&frame.doc_id, &self.coordinator_deps);
        let message = CoordinatorMessage::SyncRequest {
            conn_id: conn.id.clone(),
            message_id: frame.id,
            sender_clock: sync_protocol::VectorClock::new(),
        };
        if handle.try_send(message).is_err() {
            return Err(CoreError::CoordinatorBusy { doc_id: frame.doc_id });
        }
        Ok(())
    }

    fn handle_unsubscribe(&self, conn: &Arc<Connection>, frame: UnsubscribeFrame) -> Result<(), CoreError> {
        if !conn.is_authenticated() {
            self.reply_unauthenticated(conn, &frame.id);
            return Ok(());
        }
        self.registry.unsubscribe(&conn.id, &frame.doc_id);
        if self.registry.subscribers_of(&frame.doc_id).is_empty() {
            self.coordinators.remove(&frame.doc_id);
        }
        Ok(())
    }

    fn handle_sync_request(&self, conn: &Arc<Connection>, frame: SyncRequestFrame) -> Result<(), CoreError> {
        let Some(subject) = conn.subject() else {
            self.reply_unauthenticated(conn, &frame.id);
            return Ok(());
        };
        let now_ms = self.clock.now_ms();
        if !self.auth.can_read(&subject, &frame.doc_id, now_ms) {
            self.reply_permission_denied(conn, &frame.id, &frame.doc_id);
            return Ok(());
        }
        let handle = self.coordinators.get_or_spawn(&frame.doc_id, &self.coordinator_deps);
        let message = CoordinatorMessage::SyncRequest {
            conn_id: conn.id.clone(),
            message_id: frame.id,
            sender_clock: frame.sender_clock,
        };
        if handle.try_send(message).is_err() {
            return Err(CoreError::CoordinatorBusy { doc_id: frame.doc_id });
        }
        Ok(())
    }

    fn handle_delta(&self, conn: &Arc<Connection>, frame: DeltaFrame, timestamp_ms: i64) -> Result<(), CoreError> {
        let Some(subject) = conn.subject() else {
            self.reply_unauthenticated(conn, &frame.id);
            return Ok(());
        };
        let now_ms = self.clock.now_ms();
        if !self.auth.can_write(&subject, &frame.doc_id, now_ms) {
            self.reply_permission_denied(conn, &frame.id, &frame.doc_id);
            return Ok(());
        }
        let handle = self.coordinators.get_or_spawn(&frame.doc_id, &self.coordinator_deps);
        let message = CoordinatorMessage::LocalDelta {
            conn_id: conn.id.clone(),
            message_id: frame.id,
            delta: frame.delta,
            remote_clock: frame.remote_clock,
            writer_id: subject.client_id,
            timestamp_ms,
        };
        if handle.try_send(message).is_err() {
            return Err(CoreError::CoordinatorBusy { doc_id: frame.doc_id });
        }
        Ok(())
    }

    fn handle_awareness_subscribe(
        &self,
        conn: &Arc<Connection>,
        frame: AwarenessSubscribeFrame,
        now_ms: i64,
    ) -> Result<(), CoreError> {
        let Some(subject) = conn.subject() else {
            self.reply_unauthenticated(conn, &frame.id);
            return Ok(());
        };
        if !self.auth.can_read(&subject, &frame.doc_id, now_ms) {
            self.reply_permission_denied(conn, &frame.id, &frame.doc_id);
            return Ok(());
        }
        self.registry.subscribe_awareness(&conn.id, &frame.doc_id);
        self.ensure_awareness_relay(&frame.doc_id);
        let entries = self.awareness.snapshot(&frame.doc_id, now_ms).into_iter().map(|e| e.to_wire()).collect();
        let _ = conn.send(Frame::new(
            now_ms,
            FrameBody::AwarenessState(AwarenessStateFrame { id: frame.id, doc_id: frame.doc_id, entries }),
        ));
        Ok(())
    }

    async fn handle_awareness_update(
        &self,
        conn: &Arc<Connection>,
        frame: AwarenessUpdateFrame,
        now_ms: i64,
    ) -> Result<(), CoreError> {
        if !conn.is_authenticated() {
            self.reply_unauthenticated(conn, &frame.id);
            return Ok(());
        }
        let Some(entry) = self.awareness.update(&frame.doc_id, &frame.client_id, frame.state.clone(), frame.clock, now_ms)
        else {
            return Ok(());
        };
        let broadcast = Frame::new(
            now_ms,
            FrameBody::AwarenessUpdate(AwarenessUpdateFrame {
                id: frame.id.clone(),
                doc_id: frame.doc_id.clone(),
                client_id: entry.client_id.clone(),
                state: entry.state.clone(),
                clock: entry.clock,
            }),
        );
        self.registry.broadcast_awareness(&frame.doc_id, &broadcast, Some(&conn.id));
        self.publish_awareness(&frame.doc_id, &broadcast).await;
        Ok(())
    }

    async fn publish_awareness(&self, doc_id: &str, frame: &Frame) {
        let channel = sync_capabilities::namespaced_channel(&self.bus_channel_prefix, &format!("awareness:{doc_id}"));
        let envelope = BusEnvelope {
            origin_node_id: self.coordinator_deps.node_id.clone(),
            channel: channel.clone(),
            payload: serde_json::json!(frame),
        };
        if let Err(err) = self.bus.publish(&channel, envelope).await {
            warn!(doc_id, error = %err, "dispatcher: awareness bus publish failed");
        }
    }

    /// Spawn a task relaying remote `awareness:{docId}` bus envelopes into
    /// local state (§4.7), once per document. Lives for the process's
    /// lifetime — unlike document coordinators, awareness has no durable
    /// state to flush on teardown, so there is nothing to reap.
    fn ensure_awareness_relay(&self, doc_id: &str) {
        if !self.awareness_relays.insert(doc_id.to_string()) {
            return;
        }
        let doc_id = doc_id.to_string();
        let channel = sync_capabilities::namespaced_channel(&self.bus_channel_prefix, &format!("awareness:{doc_id}"));
        let bus = Arc::clone(&self.bus);
        let awareness = Arc::clone(&self.awareness);
        let registry = Arc::clone(&self.registry);
        let node_id = self.coordinator_deps.node_id.clone();
        tokio::spawn(async move {
            let mut stream = match bus.subscribe(&channel).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(doc_id, error = %err, "dispatcher: awareness bus subscribe failed");
                    return;
                },
            };
            use tokio_stream::StreamExt;
            while let Some(envelope) = stream.next().await {
                if envelope.origin_node_id == node_id {
                    continue;
                }
                let Ok(remote) = serde_json::from_value::<Frame>(envelope.payload) else {
                    warn!(doc_id, "dispatcher: malformed awareness envelope, dropping");
                    continue;
                };
                let FrameBody::AwarenessUpdate(update) = remote.body else { continue };
                let Some(entry) =
                    awareness.update(&doc_id, &update.client_id, update.state.clone(), update.clock, remote.timestamp)
                else {
                    continue;
                };
                let broadcast = Frame::new(
                    remote.timestamp,
                    FrameBody::AwarenessUpdate(AwarenessUpdateFrame {
                        id: update.id,
                        doc_id: doc_id.clone(),
                        client_id: entry.client_id,
                        state: entry.state,
                        clock: entry.clock,
                    }),
                );
                registry.broadcast_awareness(&doc_id, &broadcast, None);
            }
            debug!(doc_id, "dispatcher: awareness relay stream ended");
        });
    }

    /// A client disconnected: drop its document and awareness subscriptions
    /// and emit leave notifications for any presence it held (§4.6
    /// `onConnectionClosed`).
    pub fn connection_closed(&self, conn: &Connection, now_ms: i64) {
        for doc_id in conn.subscriptions() {
            self.registry.unsubscribe(&conn.id, &doc_id);
            if self.registry.subscribers_of(&doc_id).is_empty() {
                self.coordinators.remove(&doc_id);
            }
        }
        for doc_id in conn.awareness_subscriptions() {
            self.registry.unsubscribe_awareness(&conn.id, &doc_id);
        }
        let Some(subject) = conn.subject() else { return };
        for (doc_id, entry) in self.awareness.remove_client(&subject.client_id) {
            let leave = Frame::new(
                now_ms,
                FrameBody::AwarenessUpdate(AwarenessUpdateFrame {
                    id: uuid::Uuid::new_v4().to_string(),
                    doc_id: doc_id.clone(),
                    client_id: entry.client_id,
                    state: None,
                    clock: entry.clock,
                }),
            );
            self.registry.broadcast_awareness(&doc_id, &leave, None);
        }
    }

    fn reply_unauthenticated(&self, conn: &Connection, message_id: &str) {
        self.reply_error(conn, message_id, "UNAUTHENTICATED", "not authenticated");
    }

    fn reply_permission_denied(&self, conn: &Connection, message_id: &str, doc_id: &str) {
        self.reply_error(conn, message_id, "PERMISSION_DENIED", &format!("permission denied for document {doc_id}"));
    }

    fn reply_error(&self, conn: &Connection, message_id: &str, code: &str, message: &str) {
        let now_ms = self.clock.now_ms();
        let _ = conn.send(Frame::new(
            now_ms,
            FrameBody::Error(ErrorFrame { id: message_id.to_string(), code: code.to_string(), message: message.to_string() }),
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sync_auth::{AuthGuard, Permissions, StaticTokenValidator, Subject};
    use sync_capabilities::{InMemoryDocumentStore, LocalBus, SystemClock};
    use sync_protocol::{AuthFrame, FieldValue, VectorClock};

    use super::*;

    fn subject(client_id: &str, perms: Permissions) -> Subject {
        Subject { user_id: format!("u-{client_id}"), client_id: client_id.to_string(), permissions: perms, expires_at_ms: i64::MAX }
    }

    fn make_dispatcher() -> (Dispatcher, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new(100));
        let validator = StaticTokenValidator::new()
            .with_token("alice-token", subject("alice", Permissions::read_write_all()))
            .with_token("reader-token", subject("reader", Permissions { can_read: vec!["doc-1".into()], can_write: vec![], is_admin: false }));
        let auth = AuthGuard::new(Arc::new(validator), true);
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let deps = CoordinatorDeps {
            node_id: "node-a".into(),
            store: Arc::new(InMemoryDocumentStore::new()),
            bus: Arc::clone(&bus),
            bus_channel_prefix: "sync".into(),
            clock: Arc::clone(&clock),
            registry: Arc::clone(&registry),
            queue_depth: 16,
        };
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            auth,
            Arc::new(CoordinatorMap::new()),
            deps,
            Arc::new(AwarenessStore::new(30_000, 5_000)),
            bus,
            "sync".into(),
            clock,
        );
        (dispatcher, registry)
    }

    async fn connect(dispatcher: &Dispatcher, registry: &ConnectionRegistry, id: &str) -> (Arc<Connection>, tokio::sync::mpsc::Receiver<Outbound>) {
        let (conn, rx) = Connection::new(id.to_string(), 16);
        conn.set_state(ConnectionState::Authenticating);
        let conn = Arc::new(conn);
        registry.register(Arc::clone(&conn)).unwrap();
        dispatcher
            .dispatch(&conn, Frame::new(0, FrameBody::Auth(AuthFrame { id: "auth-1".into(), token: Some("alice-token".into()), api_key: None })))
            .await
            .unwrap();
        (conn, rx)
    }

    use crate::connection::Outbound;

    #[tokio::test]
    async fn auth_happy_path_sends_auth_success() {
        let (dispatcher, registry) = make_dispatcher();
        let (conn, mut rx) = connect(&dispatcher, &registry, "c1").await;
        assert!(conn.is_authenticated());
        match rx.try_recv().unwrap() {
            Outbound::Frame(f) => assert!(matches!(f.body, FrameBody::AuthSuccess(_))),
            Outbound::Close(..) => panic!("expected auth_success"),
        }
    }

    #[tokio::test]
    async fn auth_failure_does_not_authenticate() {
        let (dispatcher, registry) = make_dispatcher();
        let (conn, _rx) = Connection::new("c1".into(), 16);
        conn.set_state(ConnectionState::Authenticating);
        let conn = Arc::new(conn);
        registry.register(Arc::clone(&conn)).unwrap();
        let err = dispatcher
            .dispatch(&conn, Frame::new(0, FrameBody::Auth(AuthFrame { id: "a".into(), token: Some("bad".into()), api_key: None })))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AuthFailed));
        assert!(!conn.is_authenticated());
    }

    #[tokio::test]
    async fn unauthenticated_write_is_rejected_without_closing() {
        let (dispatcher, registry) = make_dispatcher();
        let (conn, _rx) = Connection::new("c1".into(), 16);
        conn.set_state(ConnectionState::Authenticating);
        let conn = Arc::new(conn);
        registry.register(Arc::clone(&conn)).unwrap();
        let mut delta = std::collections::HashMap::new();
        delta.insert("f".to_string(), FieldValue::Value(serde_json::json!(1)));
        let result = dispatcher
            .dispatch(
                &conn,
                Frame::new(0, FrameBody::Delta(DeltaFrame { id: "d1".into(), doc_id: "doc-1".into(), delta, remote_clock: VectorClock::new() })),
            )
            .await;
        assert!(result.is_ok(), "unauthenticated errors reply in-band, they don't close");
    }

    #[tokio::test]
    async fn subscribe_sends_sync_response_snapshot() {
        let (dispatcher, registry) = make_dispatcher();
        let (conn, mut rx) = connect(&dispatcher, &registry, "c1").await;
        let _ = rx.try_recv(); // drain auth_success

        dispatcher
            .dispatch(&conn, Frame::new(0, FrameBody::Subscribe(SubscribeFrame { id: "s1".into(), doc_id: "doc-1".into() })))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let frame = rx.recv().await.unwrap();
        match frame {
            Outbound::Frame(f) => assert!(matches!(f.body, FrameBody::SyncResponse(_))),
            Outbound::Close(..) => panic!("expected sync_response"),
        }
        assert!(registry.subscribers_of("doc-1").contains("c1"));
    }

    #[tokio::test]
    async fn delta_is_rejected_without_write_permission() {
        let registry = Arc::new(ConnectionRegistry::new(100));
        let validator = StaticTokenValidator::new().with_token(
            "reader-token",
            subject("reader", Permissions { can_read: vec!["doc-1".into()], can_write: vec![], is_admin: false }),
        );
        let auth = AuthGuard::new(Arc::new(validator), true);
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let deps = CoordinatorDeps {
            node_id: "node-a".into(),
            store: Arc::new(InMemoryDocumentStore::new()),
            bus: Arc::clone(&bus),
            bus_channel_prefix: "sync".into(),
            clock: Arc::clone(&clock),
            registry: Arc::clone(&registry),
            queue_depth: 16,
        };
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            auth,
            Arc::new(CoordinatorMap::new()),
            deps,
            Arc::new(AwarenessStore::new(30_000, 5_000)),
            bus,
            "sync".into(),
            clock,
        );
        let (conn, rx) = Connection::new("c1".into(), 16);
        conn.set_state(ConnectionState::Authenticating);
        let conn = Arc::new(conn);
        registry.register(Arc::clone(&conn)).unwrap();
        dispatcher
            .dispatch(&conn, Frame::new(0, FrameBody::Auth(AuthFrame { id: "a".into(), token: Some("reader-token".into()), api_key: None })))
            .await
            .unwrap();
        let mut rx = rx;
        let _ = rx.try_recv();

        let mut delta = std::collections::HashMap::new();
        delta.insert("f".to_string(), FieldValue::Value(serde_json::json!(1)));
        dispatcher
            .dispatch(
                &conn,
                Frame::new(0, FrameBody::Delta(DeltaFrame { id: "d1".into(), doc_id: "doc-1".into(), delta, remote_clock: VectorClock::new() })),
            )
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            Outbound::Frame(f) => match f.body {
                FrameBody::Error(e) => assert_eq!(e.code, "PERMISSION_DENIED"),
                _ => panic!("expected permission-denied error"),
            },
            Outbound::Close(..) => panic!("permission denied must not close"),
        }
    }

    #[tokio::test]
    async fn awareness_update_broadcasts_to_other_subscribers_only() {
        let (dispatcher, registry) = make_dispatcher();
        let (conn_a, mut rx_a) = connect(&dispatcher, &registry, "a").await;
        let _ = rx_a.try_recv();
        let (conn_b, mut rx_b) = connect(&dispatcher, &registry, "b").await;
        let _ = rx_b.try_recv();

        dispatcher
            .dispatch(&conn_a, Frame::new(0, FrameBody::AwarenessSubscribe(AwarenessSubscribeFrame { id: "as1".into(), doc_id: "doc-1".into() })))
            .await
            .unwrap();
        let _ = rx_a.try_recv(); // awareness_state snapshot
        dispatcher
            .dispatch(&conn_b, Frame::new(0, FrameBody::AwarenessSubscribe(AwarenessSubscribeFrame { id: "as2".into(), doc_id: "doc-1".into() })))
            .await
            .unwrap();
        let _ = rx_b.try_recv();

        dispatcher
            .dispatch(
                &conn_a,
                Frame::new(
                    0,
                    FrameBody::AwarenessUpdate(AwarenessUpdateFrame {
                        id: "u1".into(),
                        doc_id: "doc-1".into(),
                        client_id: "alice".into(),
                        state: Some(serde_json::json!({"cursor": 3})),
                        clock: 1,
                    }),
                ),
            )
            .await
            .unwrap();

        assert!(rx_a.try_recv().is_err(), "originator must not receive its own update back");
        match rx_b.try_recv().unwrap() {
            Outbound::Frame(f) => assert!(matches!(f.body, FrameBody::AwarenessUpdate(_))),
            Outbound::Close(..) => panic!("expected awareness_update"),
        }
    }

    #[tokio::test]
    async fn connection_closed_emits_awareness_leave() {
        let (dispatcher, registry) = make_dispatcher();
        let (conn_a, mut rx_a) = connect(&dispatcher, &registry, "a").await;
        let _ = rx_a.try_recv();
        let (conn_b, mut rx_b) = connect(&dispatcher, &registry, "b").await;
        let _ = rx_b.try_recv();

        dispatcher
            .dispatch(&conn_a, Frame::new(0, FrameBody::AwarenessSubscribe(AwarenessSubscribeFrame { id: "as1".into(), doc_id: "doc-1".into() })))
            .await
            .unwrap();
        let _ = rx_a.try_recv();
        dispatcher
            .dispatch(&conn_b, Frame::new(0, FrameBody::AwarenessSubscribe(AwarenessSubscribeFrame { id: "as2".into(), doc_id: "doc-1".into() })))
            .await
            .unwrap();
        let _ = rx_b.try_recv();

        dispatcher
            .dispatch(
                &conn_b,
                Frame::new(
                    0,
                    FrameBody::AwarenessUpdate(AwarenessUpdateFrame {
                        id: "u1".into(),
                        doc_id: "doc-1".into(),
                        client_id: "bob".into(),
                        state: Some(serde_json::json!({})),
                        clock: 1,
                    }),
                ),
            )
            .await
            .unwrap();
        let _ = rx_a.try_recv();

        dispatcher.connection_closed(&conn_b, 1000);

        match rx_a.try_recv().unwrap() {
            Outbound::Frame(f) => match f.body {
                FrameBody::AwarenessUpdate(u) => {
                    assert_eq!(u.client_id, "bob");
                    assert!(u.state.is_none());
                },
                _ => panic!("expected awareness leave"),
            },
            Outbound::Close(..) => panic!("expected a leave frame"),
        }
    }
}
