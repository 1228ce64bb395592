//! One endpoint's session (§3 "Connection", §4.2). Transport-agnostic: the
//! `Connection` owns an outbound queue and a small state machine; the actual
//! read/write loops against a WebSocket (or any other duplex transport) live
//! in the server crate and drain [`Connection::take_outbound`]'s receiver.

use std::{
    collections::HashSet,
    sync::{
        Mutex, OnceLock,
        atomic::{AtomicI64, Ordering},
    },
};

use sync_auth::Subject;
use sync_protocol::{Frame, WireFormat};

/// Close codes mapped onto the transport's close facility (§4.2). The first
/// five are the spec's close-code table; the rest extend it for the
/// backpressure and shutdown paths in §5/§7 that the table's prose
/// describes but doesn't tabulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    PolicyViolation,
    ProtocolError,
    ServerError,
    /// Not a standard WebSocket close code; sent as 4001 (private-use range).
    ServerBusy,
    /// Not a standard WebSocket close code; sent as 4002 (private-use range).
    ServerShuttingDown,
}

impl CloseCode {
    /// The numeric code to carry on the transport's close frame.
    #[must_use]
    pub fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::PolicyViolation => 1008,
            CloseCode::ServerError => 1011,
            CloseCode::ServerBusy => 4001,
            CloseCode::ServerShuttingDown => 4002,
        }
    }
}

/// Connection lifecycle state (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Authenticated,
    Disconnecting,
    Disconnected,
}

/// An item handed to the connection's write loop: either a frame to
/// serialize and send, or an instruction to close the transport.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Frame),
    Close(CloseCode, String),
}

/// Queue-full (§4.2 `send`): the caller should close the connection with
/// `slow consumer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowConsumer;

/// One client's session. Exclusively owns its send queue (§3); the registry
/// and coordinators only ever see it through an `Arc` looked up by id —
/// never a reference held across a suspension point (§4.3 discipline).
pub struct Connection {
    pub id: String,
    outbound: tokio::sync::mpsc::Sender<Outbound>,
    state: Mutex<ConnectionState>,
    format: OnceLock<WireFormat>,
    subject: Mutex<Option<Subject>>,
    subscriptions: Mutex<HashSet<String>>,
    awareness_subscriptions: Mutex<HashSet<String>>,
    last_seen_ms: AtomicI64,
}

impl Connection {
    /// Create a connection and its outbound channel. The caller keeps the
    /// receiver and drives the transport's write loop from it.
    #[must_use]
    pub fn new(id: String, send_queue_depth: usize) -> (Self, tokio::sync::mpsc::Receiver<Outbound>) {
        let (tx, rx) = tokio::sync::mpsc::channel(send_queue_depth.max(1));
        let conn = Self {
            id,
            outbound: tx,
            state: Mutex::new(ConnectionState::Connecting),
            format: OnceLock::new(),
            subject: Mutex::new(None),
            subscriptions: Mutex::new(HashSet::new()),
            awareness_subscriptions: Mutex::new(HashSet::new()),
            last_seen_ms: AtomicI64::new(0),
        };
        (conn, rx)
    }

    /// Enqueue a frame for asynchronous delivery (§4.2 `send`). FIFO per
    /// connection; never blocks — a full queue is the caller's cue to close
    /// with `slow consumer`.
    ///
    /// # Errors
    /// Returns [`SlowConsumer`] if the bounded queue is full, or if the
    /// connection has already started closing.
    pub fn send(&self, frame: Frame) -> Result<(), SlowConsumer> {
        self.outbound.try_send(Outbound::Frame(frame)).map_err(|_| SlowConsumer)
    }

    /// Initiate graceful close (§4.2 `close`). Idempotent: closing an
    /// already-closing/closed connection is a no-op. The actual transport
    /// teardown happens when the write loop drains this instruction.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) {
        let mut state = self.lock_state();
        if matches!(*state, ConnectionState::Disconnecting | ConnectionState::Disconnected) {
            return;
        }
        *state = ConnectionState::Disconnecting;
        drop(state);
        let _ = self.outbound.try_send(Outbound::Close(code, reason.into()));
    }

    /// Current set of subscribed document ids (§4.2 `subscriptions`).
    #[must_use]
    pub fn subscriptions(&self) -> HashSet<String> {
        self.lock_subs().clone()
    }

    pub fn add_subscription(&self, doc_id: &str) {
        self.lock_subs().insert(doc_id.to_string());
    }

    pub fn remove_subscription(&self, doc_id: &str) {
        self.lock_subs().remove(doc_id);
    }

    #[must_use]
    pub fn awareness_subscriptions(&self) -> HashSet<String> {
        self.lock_awareness_subs().clone()
    }

    pub fn add_awareness_subscription(&self, doc_id: &str) {
        self.lock_awareness_subs().insert(doc_id.to_string());
    }

    pub fn remove_awareness_subscription(&self, doc_id: &str) {
        self.lock_awareness_subs().remove(doc_id);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.lock_state() = state;
    }

    /// The wire format negotiated from this connection's first frame.
    /// Cannot be rotated (§4.2 "Format detection").
    #[must_use]
    pub fn format(&self) -> Option<WireFormat> {
        self.format.get().copied()
    }

    /// Fix the wire format. Returns `false` if a different format was
    /// already set (caller should close with `protocol-error`).
    #[must_use]
    pub fn set_format(&self, format: WireFormat) -> bool {
        match self.format.get() {
            None => self.format.set(format).is_ok(),
            Some(existing) => *existing == format,
        }
    }

    #[must_use]
    pub fn subject(&self) -> Option<Subject> {
        self.lock_subject().clone()
    }

    pub fn set_subject(&self, subject: Subject) {
        *self.lock_subject() = Some(subject);
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state(), ConnectionState::Authenticated)
    }

    /// Record that a frame was seen from this connection (§4.2 heartbeat:
    /// "any inbound frame resets the timeout").
    pub fn touch(&self, now_ms: i64) {
        self.last_seen_ms.store(now_ms, Ordering::Relaxed);
    }

    #[must_use]
    pub fn last_seen_ms(&self) -> i64 {
        self.last_seen_ms.load(Ordering::Relaxed)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_subs(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.subscriptions.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_awareness_subs(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.awareness_subscriptions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_subject(&self) -> std::sync::MutexGuard<'_, Option<Subject>> {
        self.subject.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
