//! One WebSocket connection's full lifecycle (§4.2): register, negotiate a
//! wire format from the first frame, drive a read loop and a write loop
//! concurrently with heartbeat and auth-timeout bookkeeping, then clean up.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use sync_auth::AuthGuard;
use sync_core::{CloseCode, Connection, ConnectionState, Outbound};
use sync_protocol::{self as protocol, Frame, FrameBody, PingFrame, WireFormat};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::state::AppState;

/// Drive one accepted WebSocket to completion. Never panics on a malformed
/// or hostile client — every failure path closes the connection with the
/// close code its [`sync_core::CoreError`] maps to and returns.
pub async fn handle_connection(socket: WebSocket, state: AppState, remote_addr: SocketAddr) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    debug!(conn_id = %conn_id, remote = %remote_addr, "ws: accepted");

    let (conn, mut outbound_rx) = Connection::new(conn_id.clone(), state.config.connections.send_queue_depth);
    let conn = Arc::new(conn);

    if state.registry.register(Arc::clone(&conn)).is_err() {
        warn!(conn_id = %conn_id, "ws: registration refused, registry at capacity");
        let (mut tx, _rx) = socket.split();
        let _ = tx
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::PolicyViolation.as_u16(),
                reason: "registry at capacity".into(),
            })))
            .await;
        return;
    }

    conn.set_state(ConnectionState::Authenticating);
    conn.touch(state.clock.now_ms());
    if !state.auth.required() {
        let subject = AuthGuard::implicit_subject(&conn.id);
        state.registry.index_by_user(&subject.user_id, &conn.id);
        conn.set_subject(subject);
        conn.set_state(ConnectionState::Authenticated);
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    let write_conn = Arc::clone(&conn);
    let write_handle = tokio::spawn(async move {
        while let Some(item) = outbound_rx.recv().await {
            let message = match item {
                Outbound::Frame(frame) => {
                    let format = write_conn.format().unwrap_or(WireFormat::Textual);
                    let bytes = protocol::serialize(&frame, format);
                    match format {
                        WireFormat::Textual => Message::Text(String::from_utf8_lossy(&bytes).into_owned().into()),
                        WireFormat::Binary => Message::Binary(bytes.into()),
                    }
                },
                Outbound::Close(code, reason) => {
                    let _ = ws_tx.send(Message::Close(Some(CloseFrame { code: code.as_u16(), reason: reason.into() }))).await;
                    break;
                },
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    run_read_loop(&state, &conn, &mut ws_rx).await;

    let now = state.clock.now_ms();
    state.dispatcher.connection_closed(&conn, now);
    state.registry.unregister(&conn.id);
    write_handle.abort();
    debug!(conn_id = %conn.id, "ws: connection closed");
}

async fn run_read_loop(
    state: &AppState,
    conn: &Arc<Connection>,
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
) {
    let heartbeat_interval = Duration::from_millis(state.config.heartbeat.interval_ms.max(1));
    let heartbeat_timeout_ms = i64::try_from(state.config.heartbeat.timeout_ms).unwrap_or(i64::MAX);
    let auth_timeout = Duration::from_millis(state.config.auth.timeout_ms.max(1));

    let mut heartbeat_tick = tokio::time::interval(heartbeat_interval);
    heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat_tick.tick().await; // first tick fires immediately; skip it

    let auth_deadline = tokio::time::sleep(auth_timeout);
    tokio::pin!(auth_deadline);
    let mut auth_deadline_armed = true;

    loop {
        tokio::select! {
            biased;

            message = ws_rx.next() => {
                let Some(message) = message else { break };
                match message {
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Ping(_) | Message::Pong(_)) => {
                        conn.touch(state.clock.now_ms());
                    },
                    Ok(Message::Text(text)) => {
                        conn.touch(state.clock.now_ms());
                        if !process_inbound(state, conn, text.as_bytes()).await { break; }
                    },
                    Ok(Message::Binary(bytes)) => {
                        conn.touch(state.clock.now_ms());
                        if !process_inbound(state, conn, &bytes).await { break; }
                    },
                    Err(err) => {
                        debug!(conn_id = %conn.id, error = %err, "ws: transport read error");
                        break;
                    },
                }
            }

            _ = heartbeat_tick.tick(), if conn.is_authenticated() => {
                let now = state.clock.now_ms();
                if now.saturating_sub(conn.last_seen_ms()) >= heartbeat_timeout_ms {
                    conn.close(CloseCode::GoingAway, "heartbeat timeout");
                    break;
                }
                let ping = Frame::new(now, FrameBody::Ping(PingFrame { id: uuid::Uuid::new_v4().to_string() }));
                if conn.send(ping).is_err() {
                    conn.close(CloseCode::PolicyViolation, "slow consumer");
                    break;
                }
            }

            () = &mut auth_deadline, if auth_deadline_armed => {
                auth_deadline_armed = false;
                if conn.state() == ConnectionState::Authenticating {
                    conn.close(CloseCode::PolicyViolation, "authentication timeout");
                    break;
                }
            }
        }
    }
}

/// Parse one inbound payload and dispatch it. Returns `false` if the
/// connection should stop reading — either the format/frame was malformed
/// or the dispatcher returned a connection-fatal error, in both of which
/// cases `conn` has already been told to close.
async fn process_inbound(state: &AppState, conn: &Arc<Connection>, bytes: &[u8]) -> bool {
    let detected = protocol::detect_format(bytes);
    let format = match conn.format() {
        Some(existing) if existing == detected => existing,
        Some(_) => {
            conn.close(CloseCode::ProtocolError, "wire format changed mid-connection");
            return false;
        },
        None => {
            if !conn.set_format(detected) {
                conn.close(CloseCode::ProtocolError, "wire format changed mid-connection");
                return false;
            }
            detected
        },
    };

    let frame = match protocol::parse(bytes, format) {
        Ok(frame) => frame,
        Err(err) => {
            conn.close(CloseCode::ProtocolError, format!("malformed frame: {err}"));
            return false;
        },
    };

    match state.dispatcher.dispatch(conn, frame).await {
        Ok(()) => true,
        Err(err) => {
            conn.close(err.close_code(), err.to_string());
            false
        },
    }
}
