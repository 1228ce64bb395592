//! HTTP surface: the liveness probe, the WebSocket upgrade, and a set of
//! REST auth-shim stubs that front the same [`sync_auth::TokenValidator`]
//! the WebSocket `auth` frame uses (§10.6) — login/refresh are genuinely out
//! of scope (§1), `me`/`verify` just exercise the validator already wired
//! into [`AppState`].

use axum::{
    Json,
    extract::{ConnectInfo, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use serde_json::json;
use std::net::SocketAddr;

use crate::{state::AppState, ws};

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "node_id": &*state.node_id,
        "connections": state.registry.len(),
    }))
}

pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if state.registry.at_capacity() {
        return (StatusCode::SERVICE_UNAVAILABLE, "registry at capacity").into_response();
    }
    let max_payload = state.config.connections.max_payload_bytes;
    ws.max_message_size(max_payload)
        .max_frame_size(max_payload)
        .on_upgrade(move |socket| ws::handle_connection(socket, state, remote_addr))
        .into_response()
}

/// Identity issuance — login and refresh — is out of scope (§1); a
/// production deployment fronts this server with a real identity provider
/// and only ever presents it with already-issued tokens.
pub async fn auth_login_stub() -> impl IntoResponse {
    (StatusCode::NOT_IMPLEMENTED, Json(json!({ "error": "login is not implemented; issue tokens out of band" })))
}

pub async fn auth_refresh_stub() -> impl IntoResponse {
    (StatusCode::NOT_IMPLEMENTED, Json(json!({ "error": "refresh is not implemented; issue tokens out of band" })))
}

/// Resolve the subject behind a bearer token, the same credential the
/// `auth` frame accepts.
pub async fn auth_me_handler(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(token) = bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "missing bearer token" }))).into_response();
    };
    match state.auth.authenticate(Some(token), None).await {
        Ok(subject) => Json(json!({
            "user_id": subject.user_id,
            "client_id": subject.client_id,
            "permissions": subject.permissions,
        }))
        .into_response(),
        Err(_) => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid token" }))).into_response(),
    }
}

/// `true`/`false` on whether a bearer token currently validates, without
/// revealing the subject it resolves to.
pub async fn auth_verify_handler(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(token) = bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "valid": false }))).into_response();
    };
    match state.auth.authenticate(Some(token), None).await {
        Ok(_) => Json(json!({ "valid": true })).into_response(),
        Err(_) => (StatusCode::UNAUTHORIZED, Json(json!({ "valid": false }))).into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}
