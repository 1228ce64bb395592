use crate::{error::MalformedFrame, frames::Frame};

/// Parse a textual (JSON) frame.
///
/// # Errors
/// Returns [`MalformedFrame`] on invalid JSON, an unrecognized `type`, or a
/// message missing required fields. Never panics on adversarial input.
pub fn parse_textual(bytes: &[u8]) -> Result<Frame, MalformedFrame> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Serialize a frame to its textual (JSON) form.
#[must_use]
pub fn serialize_textual(frame: &Frame) -> String {
    // `Frame`'s fields are all serializable scalars/maps; this cannot fail.
    serde_json::to_string(frame).unwrap_or_else(|e| {
        format!(r#"{{"type":"error","id":"","code":"INTERNAL","message":"{e}"}}"#)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::frames::{FrameBody, PingFrame, SyncResponseFrame};

    #[test]
    fn round_trips_a_simple_frame() {
        let frame = Frame::new(
            1234,
            FrameBody::Ping(PingFrame { id: "m1".into() }),
        );
        let json = serialize_textual(&frame);
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"timestamp\":1234"));
        let parsed = parse_textual(json.as_bytes()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_textual(b"{not json").unwrap_err();
        assert!(matches!(err, MalformedFrame::InvalidJson(_)));
    }

    #[test]
    fn rejects_unknown_kind_without_panicking() {
        let err = parse_textual(br#"{"type":"teleport","id":"1","timestamp":0}"#).unwrap_err();
        assert!(matches!(err, MalformedFrame::InvalidJson(_)));
    }

    #[test]
    fn tolerates_clock_alias_on_sync_request() {
        let json = br#"{"type":"sync_request","id":"1","timestamp":0,"docId":"d1","clock":{"alpha":3}}"#;
        let frame = parse_textual(json).unwrap();
        match frame.body {
            FrameBody::SyncRequest(req) => {
                assert_eq!(req.sender_clock.get("alpha"), Some(&3));
            },
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn emits_vector_clock_key_never_bare_clock() {
        let mut vc = HashMap::new();
        vc.insert("alpha".to_string(), 3u64);
        let frame = Frame::new(
            0,
            FrameBody::SyncResponse(SyncResponseFrame {
                id: "1".into(),
                doc_id: "d1".into(),
                fields: HashMap::new(),
                vector_clock: vc,
            }),
        );
        let json = serialize_textual(&frame);
        assert!(json.contains("\"vectorClock\""));
        assert!(!json.contains("\"clock\":"));
    }
}
