use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A writer's vector clock, keyed by client id.
pub type VectorClock = HashMap<String, u64>;

/// An opaque field value, or the tombstone marker written by a delete.
///
/// The core never interprets field contents beyond this — see the spec's
/// "Dynamic any-valued field payloads" design note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Tombstone(Tombstone),
    Value(serde_json::Value),
}

impl FieldValue {
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, FieldValue::Tombstone(_))
    }

    #[must_use]
    pub fn tombstone() -> Self {
        FieldValue::Tombstone(Tombstone { deleted: true })
    }
}

/// Wire shape of the tombstone marker: `{"deleted": true}`. `untagged`
/// deserialization tries this variant before falling through to a bare
/// JSON value, so any other shape (including `{"deleted": false}`) falls
/// through to [`FieldValue::Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    #[serde(deserialize_with = "deserialize_true")]
    deleted: bool,
}

fn deserialize_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = bool::deserialize(deserializer)?;
    if value {
        Ok(value)
    } else {
        Err(serde::de::Error::custom("tombstone marker must be `true`"))
    }
}

/// A record of the authoritative value for one document field, as sent over
/// the wire in a `sync_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRecordWire {
    pub value: FieldValue,
    pub timestamp: i64,
    pub clock: u64,
    pub writer_id: String,
}

/// Client-presented credentials on the `auth` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFrame {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "apiKey")]
    pub api_key: Option<String>,
}

/// Permission set granted to an authenticated subject, as advertised to the
/// client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsWire {
    pub can_read: Vec<String>,
    pub can_write: Vec<String>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccessFrame {
    pub id: String,
    pub user_id: String,
    pub permissions: PermissionsWire,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthErrorFrame {
    pub id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeFrame {
    pub id: String,
    pub doc_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeFrame {
    pub id: String,
    pub doc_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequestFrame {
    pub id: String,
    pub doc_id: String,
    /// Sender's last-known vector clock; empty means "send everything".
    #[serde(default, rename = "vectorClock", alias = "clock")]
    pub sender_clock: VectorClock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponseFrame {
    pub id: String,
    pub doc_id: String,
    pub fields: HashMap<String, FieldRecordWire>,
    #[serde(rename = "vectorClock")]
    pub vector_clock: VectorClock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaFrame {
    pub id: String,
    pub doc_id: String,
    pub delta: HashMap<String, FieldValue>,
    #[serde(rename = "vectorClock", alias = "clock")]
    pub remote_clock: VectorClock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckFrame {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingFrame {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongFrame {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessUpdateFrame {
    pub id: String,
    pub doc_id: String,
    pub client_id: String,
    /// `null` means the client is leaving.
    pub state: Option<serde_json::Value>,
    pub clock: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessSubscribeFrame {
    pub id: String,
    pub doc_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessEntryWire {
    pub client_id: String,
    pub state: Option<serde_json::Value>,
    pub clock: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessStateFrame {
    pub id: String,
    pub doc_id: String,
    pub entries: Vec<AwarenessEntryWire>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    pub id: String,
    pub code: String,
    pub message: String,
}

/// Every message kind the protocol carries, tagged by the wire-level `type`
/// discriminator. Each variant's fields (plus `type`) are flattened into the
/// same JSON object in the textual encoding; in the binary encoding the kind
/// and timestamp move into the fixed header and only the remainder is
/// serialized as the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameBody {
    Auth(AuthFrame),
    AuthSuccess(AuthSuccessFrame),
    AuthError(AuthErrorFrame),
    Subscribe(SubscribeFrame),
    Unsubscribe(UnsubscribeFrame),
    SyncRequest(SyncRequestFrame),
    SyncResponse(SyncResponseFrame),
    Delta(DeltaFrame),
    Ack(AckFrame),
    Ping(PingFrame),
    Pong(PongFrame),
    AwarenessUpdate(AwarenessUpdateFrame),
    AwarenessSubscribe(AwarenessSubscribeFrame),
    AwarenessState(AwarenessStateFrame),
    Error(ErrorFrame),
}

impl FrameBody {
    /// The stable message-id field carried by every frame.
    #[must_use]
    pub fn message_id(&self) -> &str {
        match self {
            FrameBody::Auth(f) => &f.id,
            FrameBody::AuthSuccess(f) => &f.id,
            FrameBody::AuthError(f) => &f.id,
            FrameBody::Subscribe(f) => &f.id,
            FrameBody::Unsubscribe(f) => &f.id,
            FrameBody::SyncRequest(f) => &f.id,
            FrameBody::SyncResponse(f) => &f.id,
            FrameBody::Delta(f) => &f.id,
            FrameBody::Ack(f) => &f.id,
            FrameBody::Ping(f) => &f.id,
            FrameBody::Pong(f) => &f.id,
            FrameBody::AwarenessUpdate(f) => &f.id,
            FrameBody::AwarenessSubscribe(f) => &f.id,
            FrameBody::AwarenessState(f) => &f.id,
            FrameBody::Error(f) => &f.id,
        }
    }

    /// The stable kind name used for logging and the routing table.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            FrameBody::Auth(_) => "auth",
            FrameBody::AuthSuccess(_) => "auth_success",
            FrameBody::AuthError(_) => "auth_error",
            FrameBody::Subscribe(_) => "subscribe",
            FrameBody::Unsubscribe(_) => "unsubscribe",
            FrameBody::SyncRequest(_) => "sync_request",
            FrameBody::SyncResponse(_) => "sync_response",
            FrameBody::Delta(_) => "delta",
            FrameBody::Ack(_) => "ack",
            FrameBody::Ping(_) => "ping",
            FrameBody::Pong(_) => "pong",
            FrameBody::AwarenessUpdate(_) => "awareness_update",
            FrameBody::AwarenessSubscribe(_) => "awareness_subscribe",
            FrameBody::AwarenessState(_) => "awareness_state",
            FrameBody::Error(_) => "error",
        }
    }
}

/// A complete protocol frame: a message body plus the millisecond timestamp
/// every frame carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: i64,
    #[serde(flatten)]
    pub body: FrameBody,
}

impl Frame {
    #[must_use]
    pub fn new(timestamp: i64, body: FrameBody) -> Self {
        Self { timestamp, body }
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        self.body.message_id()
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.body.kind_name()
    }
}

/// Kind codes used by the binary encoding's one-byte header field.
pub mod kind_codes {
    pub const AUTH: u8 = 0x01;
    pub const AUTH_SUCCESS: u8 = 0x02;
    pub const AUTH_ERROR: u8 = 0x03;
    pub const SUBSCRIBE: u8 = 0x10;
    pub const UNSUBSCRIBE: u8 = 0x11;
    pub const SYNC_REQUEST: u8 = 0x12;
    pub const SYNC_RESPONSE: u8 = 0x13;
    pub const DELTA: u8 = 0x20;
    pub const ACK: u8 = 0x21;
    pub const PING: u8 = 0x30;
    pub const PONG: u8 = 0x31;
    pub const AWARENESS_UPDATE: u8 = 0x40;
    pub const AWARENESS_SUBSCRIBE: u8 = 0x41;
    pub const AWARENESS_STATE: u8 = 0x42;
    pub const ERROR: u8 = 0xFF;
}

impl FrameBody {
    #[must_use]
    pub fn kind_code(&self) -> u8 {
        use kind_codes::*;
        match self {
            FrameBody::Auth(_) => AUTH,
            FrameBody::AuthSuccess(_) => AUTH_SUCCESS,
            FrameBody::AuthError(_) => AUTH_ERROR,
            FrameBody::Subscribe(_) => SUBSCRIBE,
            FrameBody::Unsubscribe(_) => UNSUBSCRIBE,
            FrameBody::SyncRequest(_) => SYNC_REQUEST,
            FrameBody::SyncResponse(_) => SYNC_RESPONSE,
            FrameBody::Delta(_) => DELTA,
            FrameBody::Ack(_) => ACK,
            FrameBody::Ping(_) => PING,
            FrameBody::Pong(_) => PONG,
            FrameBody::AwarenessUpdate(_) => AWARENESS_UPDATE,
            FrameBody::AwarenessSubscribe(_) => AWARENESS_SUBSCRIBE,
            FrameBody::AwarenessState(_) => AWARENESS_STATE,
            FrameBody::Error(_) => ERROR,
        }
    }
}
