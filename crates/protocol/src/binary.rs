use crate::{
    error::MalformedFrame,
    frames::{
        AckFrame, AuthErrorFrame, AuthFrame, AuthSuccessFrame, AwarenessStateFrame,
        AwarenessSubscribeFrame, AwarenessUpdateFrame, DeltaFrame, ErrorFrame, Frame, FrameBody,
        PingFrame, PongFrame, SubscribeFrame, SyncRequestFrame, SyncResponseFrame,
        UnsubscribeFrame, kind_codes,
    },
};

const HEADER_LEN: usize = 1 + 8 + 4;

/// Serialize a frame to the binary encoding: a 13-byte fixed header (kind
/// code, big-endian i64 timestamp, big-endian u32 payload length) followed
/// by the UTF-8 JSON payload of the kind-specific fields.
#[must_use]
pub fn serialize_binary(frame: &Frame) -> Vec<u8> {
    let kind = frame.body.kind_code();
    let payload = encode_payload(&frame.body);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(kind);
    out.extend_from_slice(&frame.timestamp.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Parse a binary frame.
///
/// # Errors
/// Returns [`MalformedFrame`] if the buffer is too short, the declared
/// payload length overruns the buffer, the kind code is unrecognized, or
/// the payload is not valid JSON for that kind. Never panics.
pub fn parse_binary(bytes: &[u8]) -> Result<Frame, MalformedFrame> {
    if bytes.len() < HEADER_LEN {
        return Err(MalformedFrame::TooShort {
            need: HEADER_LEN,
            got: bytes.len(),
        });
    }

    let kind = bytes[0];
    let timestamp = i64::from_be_bytes(read_be8(&bytes[1..9]));
    let payload_len = u32::from_be_bytes(read_be4(&bytes[9..13])) as usize;

    let available = bytes.len() - HEADER_LEN;
    if payload_len > available {
        return Err(MalformedFrame::PayloadLengthMismatch {
            declared: payload_len as u32,
            available,
        });
    }
    let payload = &bytes[HEADER_LEN..HEADER_LEN + payload_len];

    let body = decode_payload(kind, payload)?;
    Ok(Frame::new(timestamp, body))
}

/// Copies a known-length slice into a fixed array without `TryInto::unwrap`,
/// since the caller has already bounds-checked `bytes.len() >= HEADER_LEN`.
fn read_be8(slice: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(slice);
    out
}

fn read_be4(slice: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(slice);
    out
}

fn encode_payload(body: &FrameBody) -> Vec<u8> {
    // Each arm serializes only the kind-specific struct — no `type` tag,
    // since the kind code in the header already conveys it.
    let result = match body {
        FrameBody::Auth(f) => serde_json::to_vec(f),
        FrameBody::AuthSuccess(f) => serde_json::to_vec(f),
        FrameBody::AuthError(f) => serde_json::to_vec(f),
        FrameBody::Subscribe(f) => serde_json::to_vec(f),
        FrameBody::Unsubscribe(f) => serde_json::to_vec(f),
        FrameBody::SyncRequest(f) => serde_json::to_vec(f),
        FrameBody::SyncResponse(f) => serde_json::to_vec(f),
        FrameBody::Delta(f) => serde_json::to_vec(f),
        FrameBody::Ack(f) => serde_json::to_vec(f),
        FrameBody::Ping(f) => serde_json::to_vec(f),
        FrameBody::Pong(f) => serde_json::to_vec(f),
        FrameBody::AwarenessUpdate(f) => serde_json::to_vec(f),
        FrameBody::AwarenessSubscribe(f) => serde_json::to_vec(f),
        FrameBody::AwarenessState(f) => serde_json::to_vec(f),
        FrameBody::Error(f) => serde_json::to_vec(f),
    };
    // Every kind-specific struct is plain-old-data; serialization cannot fail.
    result.unwrap_or_default()
}

fn decode_payload(kind: u8, payload: &[u8]) -> Result<FrameBody, MalformedFrame> {
    Ok(match kind {
        kind_codes::AUTH => FrameBody::Auth(serde_json::from_slice::<AuthFrame>(payload)?),
        kind_codes::AUTH_SUCCESS => {
            FrameBody::AuthSuccess(serde_json::from_slice::<AuthSuccessFrame>(payload)?)
        },
        kind_codes::AUTH_ERROR => {
            FrameBody::AuthError(serde_json::from_slice::<AuthErrorFrame>(payload)?)
        },
        kind_codes::SUBSCRIBE => {
            FrameBody::Subscribe(serde_json::from_slice::<SubscribeFrame>(payload)?)
        },
        kind_codes::UNSUBSCRIBE => {
            FrameBody::Unsubscribe(serde_json::from_slice::<UnsubscribeFrame>(payload)?)
        },
        kind_codes::SYNC_REQUEST => {
            FrameBody::SyncRequest(serde_json::from_slice::<SyncRequestFrame>(payload)?)
        },
        kind_codes::SYNC_RESPONSE => {
            FrameBody::SyncResponse(serde_json::from_slice::<SyncResponseFrame>(payload)?)
        },
        kind_codes::DELTA => FrameBody::Delta(serde_json::from_slice::<DeltaFrame>(payload)?),
        kind_codes::ACK => FrameBody::Ack(serde_json::from_slice::<AckFrame>(payload)?),
        kind_codes::PING => FrameBody::Ping(serde_json::from_slice::<PingFrame>(payload)?),
        kind_codes::PONG => FrameBody::Pong(serde_json::from_slice::<PongFrame>(payload)?),
        kind_codes::AWARENESS_UPDATE => {
            FrameBody::AwarenessUpdate(serde_json::from_slice::<AwarenessUpdateFrame>(payload)?)
        },
        kind_codes::AWARENESS_SUBSCRIBE => FrameBody::AwarenessSubscribe(serde_json::from_slice::<
            AwarenessSubscribeFrame,
        >(payload)?),
        kind_codes::AWARENESS_STATE => {
            FrameBody::AwarenessState(serde_json::from_slice::<AwarenessStateFrame>(payload)?)
        },
        kind_codes::ERROR => FrameBody::Error(serde_json::from_slice::<ErrorFrame>(payload)?),
        code => return Err(MalformedFrame::UnknownKind { code }),
    })
}
