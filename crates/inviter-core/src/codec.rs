//! JSON text-frame codec for the daemon connection.
//!
//! Outbound frames are serialized straight from [`ServerMessage`]. Inbound
//! frames come from an independently versioned binary, so decoding checks
//! field presence and type before trusting anything.

use crate::error::{DaemonErrorCode, InviterError, InviterResult};
use crate::messages::{DaemonCmd, DaemonResponse, InboundBody, InboundFrame, ServerMessage};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Encode a server frame as JSON text.
pub fn encode_server_message(message: &ServerMessage) -> InviterResult<String> {
    serde_json::to_string(message).map_err(|_| InviterError::SendRequest)
}

/// Decode a daemon text frame.
///
/// - not JSON: `Err(InvalidResponseJson)`, which is fatal to the connection
/// - no usable `id`: `Ok(None)`, nothing to correlate
/// - otherwise an [`InboundFrame`] whose body says how to settle the request
pub fn decode_inbound(raw: &str) -> InviterResult<Option<InboundFrame>> {
    let value: Value = serde_json::from_str(raw).map_err(|_| InviterError::InvalidResponseJson)?;

    let Some(object) = value.as_object() else {
        return Ok(None);
    };
    let Some(id) = object
        .get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
    else {
        return Ok(None);
    };

    let body = match object
        .get("cmd")
        .and_then(Value::as_str)
        .and_then(DaemonCmd::from_wire)
    {
        Some(DaemonCmd::Error) => {
            let code = object
                .get("code")
                .and_then(Value::as_str)
                .map(DaemonErrorCode::from_code)
                .unwrap_or(DaemonErrorCode::Unknown);
            InboundBody::Error(code)
        }
        Some(DaemonCmd::GameId) => game_id_field(object)
            .map(|game| InboundBody::Response(DaemonResponse::GameId(game)))
            .unwrap_or(InboundBody::Invalid),
        Some(DaemonCmd::Link) => object
            .get("url")
            .and_then(Value::as_str)
            .map(|url| InboundBody::Response(DaemonResponse::Link(url.to_string())))
            .unwrap_or(InboundBody::Invalid),
        Some(DaemonCmd::Message) | Some(DaemonCmd::Exit) | None => InboundBody::Invalid,
    };

    Ok(Some(InboundFrame { id, body }))
}

/// Game ids are JSON integers; floats such as `730.0` are rejected.
fn game_id_field(object: &Map<String, Value>) -> Option<u64> {
    object.get("game").and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RequestUser;

    const ID: &str = "6f1c1f9e-3a6b-4a53-9a52-2f4e1f8e0c11";

    fn decode(raw: &str) -> Option<InboundFrame> {
        decode_inbound(raw).unwrap()
    }

    fn body(raw: &str) -> InboundBody {
        decode(raw).expect("frame should correlate").body
    }

    #[test]
    fn non_json_is_fatal() {
        assert_eq!(decode_inbound("not json"), Err(InviterError::InvalidResponseJson));
        assert_eq!(decode_inbound("{\"id\":"), Err(InviterError::InvalidResponseJson));
    }

    #[test]
    fn frames_without_usable_id_are_discarded() {
        assert_eq!(decode(r#"{"cmd":"link","url":"x"}"#), None);
        assert_eq!(decode(r#"{"id":"nope","cmd":"link","url":"x"}"#), None);
        assert_eq!(decode(r#"{"id":5,"cmd":"link","url":"x"}"#), None);
        assert_eq!(decode(r#"[1,2,3]"#), None);
        assert_eq!(decode("42"), None);
    }

    #[test]
    fn link_response() {
        let frame = decode(&format!(
            r#"{{"id":"{ID}","cmd":"link","url":"https://example/invite/1"}}"#
        ))
        .unwrap();
        assert_eq!(frame.id.to_string(), ID);
        assert_eq!(
            frame.body,
            InboundBody::Response(DaemonResponse::Link("https://example/invite/1".into()))
        );
    }

    #[test]
    fn game_response_accepts_both_spellings() {
        for tag in ["game", "gameId"] {
            assert_eq!(
                body(&format!(r#"{{"id":"{ID}","cmd":"{tag}","game":730}}"#)),
                InboundBody::Response(DaemonResponse::GameId(730))
            );
        }
    }

    #[test]
    fn missing_or_mistyped_payload_is_invalid() {
        assert_eq!(body(&format!(r#"{{"id":"{ID}","cmd":"link"}}"#)), InboundBody::Invalid);
        assert_eq!(body(&format!(r#"{{"id":"{ID}","cmd":"link","url":7}}"#)), InboundBody::Invalid);
        assert_eq!(body(&format!(r#"{{"id":"{ID}","cmd":"game"}}"#)), InboundBody::Invalid);
        assert_eq!(
            body(&format!(r#"{{"id":"{ID}","cmd":"game","game":"730"}}"#)),
            InboundBody::Invalid
        );
        assert_eq!(body(&format!(r#"{{"id":"{ID}","cmd":"game","game":-1}}"#)), InboundBody::Invalid);
    }

    #[test]
    fn game_id_must_be_an_integer() {
        assert_eq!(body(&format!(r#"{{"id":"{ID}","cmd":"game","game":730.0}}"#)), InboundBody::Invalid);
        assert_eq!(body(&format!(r#"{{"id":"{ID}","cmd":"game","game":730.5}}"#)), InboundBody::Invalid);
        assert_eq!(
            body(&format!(r#"{{"id":"{ID}","cmd":"game","game":730}}"#)),
            InboundBody::Response(DaemonResponse::GameId(730))
        );
    }

    #[test]
    fn unknown_and_server_only_tags_are_invalid() {
        for cmd in [r#""panel""#, r#""message""#, r#""exit""#, "3", "null"] {
            assert_eq!(
                body(&format!(r#"{{"id":"{ID}","cmd":{cmd}}}"#)),
                InboundBody::Invalid,
                "cmd {cmd}"
            );
        }
        assert_eq!(body(&format!(r#"{{"id":"{ID}"}}"#)), InboundBody::Invalid);
    }

    #[test]
    fn error_frames_map_codes() {
        assert_eq!(
            body(&format!(r#"{{"id":"{ID}","cmd":"error","code":"invalid_app"}}"#)),
            InboundBody::Error(DaemonErrorCode::InvalidApp)
        );
        assert_eq!(
            body(&format!(r#"{{"id":"{ID}","cmd":"error","code":"from_the_future"}}"#)),
            InboundBody::Error(DaemonErrorCode::Unknown)
        );
        assert_eq!(
            body(&format!(r#"{{"id":"{ID}","cmd":"error"}}"#)),
            InboundBody::Error(DaemonErrorCode::Unknown)
        );
    }

    #[test]
    fn encoded_query_is_valid_json() {
        let id = Uuid::new_v4();
        let text = encode_server_message(&ServerMessage::GameId {
            id,
            user: RequestUser::new("7", "carol"),
        })
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], id.to_string());
        assert_eq!(value["cmd"], "game");
    }
}
