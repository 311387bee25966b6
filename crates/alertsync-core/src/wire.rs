use serde_json::Value;

use crate::message::Message;

const NEW_MESSAGE_HINT: &str = "new_message";

/// A decoded live payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiveFrame {
    /// A complete message record.
    Message(Message),
    /// "Something new is available" without the record itself
    /// (push notification data). Resolved by a history refresh.
    RefreshHint,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized frame: {0}")]
    Unrecognized(String),
}

/// Decode one raw live payload.
///
/// Accepts a bare message object, a `{"type": "new_message"}` hint, or a
/// push notification content object carrying either under `data`.
pub fn decode_live_frame(raw: &str) -> Result<LiveFrame, WireError> {
    let value: Value = serde_json::from_str(raw)?;
    decode_value(value)
}

fn decode_value(value: Value) -> Result<LiveFrame, WireError> {
    let Value::Object(map) = value else {
        return Err(WireError::Unrecognized("payload is not an object".into()));
    };

    if !map.contains_key("id") {
        if let Some(Value::Object(data)) = map.get("data") {
            return decode_value(Value::Object(data.clone()));
        }
        if map.get("type").and_then(Value::as_str) == Some(NEW_MESSAGE_HINT) {
            return Ok(LiveFrame::RefreshHint);
        }
        return Err(WireError::Unrecognized("object has no id".into()));
    }

    let message: Message = serde_json::from_value(Value::Object(map))?;
    Ok(LiveFrame::Message(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Category;

    #[test]
    fn decodes_bare_message() {
        let frame = decode_live_frame(
            r#"{"id": 3, "message": "Alarme incendie", "timestamp": "2024-05-01T12:00:00Z", "type": "Info"}"#,
        )
        .unwrap();
        match frame {
            LiveFrame::Message(msg) => {
                assert_eq!(msg.id.as_str(), "3");
                assert_eq!(msg.category, Category::Info);
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn decodes_refresh_hint() {
        let frame = decode_live_frame(r#"{"type": "new_message"}"#).unwrap();
        assert_eq!(frame, LiveFrame::RefreshHint);
    }

    #[test]
    fn decodes_push_content_data() {
        let frame = decode_live_frame(
            r#"{"title": "ECA", "body": "Nouveau message", "data": {"type": "new_message"}}"#,
        )
        .unwrap();
        assert_eq!(frame, LiveFrame::RefreshHint);

        let frame = decode_live_frame(
            r#"{"data": {"id": "x1", "message": "m", "timestamp": "2024-05-01T12:00:00Z", "type": "Debug"}}"#,
        )
        .unwrap();
        assert!(matches!(frame, LiveFrame::Message(m) if m.category == Category::Debug));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(decode_live_frame("not json"), Err(WireError::Json(_))));
        assert!(matches!(decode_live_frame("[1, 2]"), Err(WireError::Unrecognized(_))));
        assert!(matches!(
            decode_live_frame(r#"{"type": "ping"}"#),
            Err(WireError::Unrecognized(_))
        ));
    }

    #[test]
    fn rejects_message_with_bad_timestamp() {
        let result = decode_live_frame(r#"{"id": 1, "message": "m", "timestamp": "yesterday"}"#);
        assert!(matches!(result, Err(WireError::Json(_))));
    }
}
