//! Envelope codec for the push channel.
//!
//! Inbound frames are JSON objects `{ "type": <tag>, "payload": {...} }` with an
//! optional `"channel"` naming the key they were delivered on. Empty frames are
//! heartbeats. Outbound frames mirror the shape as
//! `{ "destinationChannel": <dest>, "body": {...} }`.

use crate::channels::{ChannelKey, ChannelKeyError};
use crate::events::{self, DomainEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Heartbeat frame sent on the outbound direction.
pub const HEARTBEAT_FRAME: &str = "\n";

const HEARTBEAT_TAG: &str = "Heartbeat";
pub const AUTH_ACCEPTED: &str = "AuthAccepted";
pub const AUTH_REJECTED: &str = "AuthRejected";
pub const CHANNEL_JOINED: &str = "ChannelJoined";

pub const AUTH_DESTINATION: &str = "auth";
pub const JOIN_DESTINATION: &str = "join";
pub const LEAVE_DESTINATION: &str = "leave";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` has the wrong type")]
    WrongType(&'static str),
    #[error("invalid payload for {tag}: {source}")]
    InvalidPayload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid channel: {0}")]
    InvalidChannel(#[from] ChannelKeyError),
}

/// Handshake and bookkeeping frames of the push protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    AuthAccepted,
    AuthRejected { reason: String },
    ChannelJoined { channel: ChannelKey },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Heartbeat,
    Control(ControlFrame),
    Event {
        channel: Option<ChannelKey>,
        event: DomainEvent,
    },
}

/// Decodes one inbound frame.
///
/// Unknown tags decode to [`DomainEvent::Unrecognized`]; structural problems
/// are a [`DecodeError`].
pub fn decode(raw: &str) -> Result<InboundFrame, DecodeError> {
    if raw.trim().is_empty() {
        return Ok(InboundFrame::Heartbeat);
    }

    let value: Value = serde_json::from_str(raw).map_err(DecodeError::Json)?;
    let Value::Object(mut frame) = value else {
        return Err(DecodeError::NotAnObject);
    };
    if frame.is_empty() {
        return Ok(InboundFrame::Heartbeat);
    }

    let tag = match frame.remove("type") {
        Some(Value::String(tag)) => tag,
        Some(_) => return Err(DecodeError::WrongType("type")),
        None => return Err(DecodeError::MissingField("type")),
    };

    let channel = match frame.remove("channel") {
        Some(Value::String(channel)) => Some(channel.parse::<ChannelKey>()?),
        Some(Value::Null) | None => None,
        Some(_) => return Err(DecodeError::WrongType("channel")),
    };

    let payload = frame.remove("payload");

    let event = match tag.as_str() {
        HEARTBEAT_TAG => return Ok(InboundFrame::Heartbeat),
        AUTH_ACCEPTED => return Ok(InboundFrame::Control(ControlFrame::AuthAccepted)),
        AUTH_REJECTED => {
            let reason = payload
                .as_ref()
                .and_then(|p| p.get("reason"))
                .and_then(Value::as_str)
                .unwrap_or("credential rejected")
                .to_owned();
            return Ok(InboundFrame::Control(ControlFrame::AuthRejected { reason }));
        }
        CHANNEL_JOINED => {
            let joined = match payload.as_ref().and_then(|p| p.get("channel")) {
                Some(Value::String(joined)) => joined.parse::<ChannelKey>()?,
                Some(_) => return Err(DecodeError::WrongType("channel")),
                None => channel.ok_or(DecodeError::MissingField("channel"))?,
            };
            return Ok(InboundFrame::Control(ControlFrame::ChannelJoined { channel: joined }));
        }
        events::MESSAGE_CREATED => DomainEvent::MessageCreated(payload_of(&tag, payload)?),
        events::MESSAGE_UPDATED => DomainEvent::MessageUpdated(payload_of(&tag, payload)?),
        events::MESSAGE_DELETED => DomainEvent::MessageDeleted(payload_of(&tag, payload)?),
        events::CONVERSATION_CREATED => {
            DomainEvent::ConversationCreated(payload_of(&tag, payload)?)
        }
        events::CONVERSATION_UPDATED => {
            DomainEvent::ConversationUpdated(payload_of(&tag, payload)?)
        }
        events::TYPING_CHANGED => DomainEvent::TypingChanged(payload_of(&tag, payload)?),
        events::PRESENCE_CHANGED => DomainEvent::PresenceChanged(payload_of(&tag, payload)?),
        events::NOTIFICATION_CREATED => {
            DomainEvent::NotificationCreated(payload_of(&tag, payload)?)
        }
        events::NOTIFICATION_STATUS_CHANGED => {
            DomainEvent::NotificationStatusChanged(payload_of(&tag, payload)?)
        }
        _ => DomainEvent::Unrecognized { tag },
    };

    Ok(InboundFrame::Event { channel, event })
}

fn payload_of<T: DeserializeOwned>(tag: &str, payload: Option<Value>) -> Result<T, DecodeError> {
    let payload = match payload {
        Some(payload @ Value::Object(_)) => payload,
        Some(_) => return Err(DecodeError::WrongType("payload")),
        None => return Err(DecodeError::MissingField("payload")),
    };
    serde_json::from_value(payload).map_err(|source| DecodeError::InvalidPayload {
        tag: tag.to_owned(),
        source,
    })
}

/// A client-originated frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    pub destination_channel: String,
    pub body: Value,
}

impl OutboundFrame {
    pub fn new(destination_channel: impl Into<String>, body: Value) -> Self {
        Self {
            destination_channel: destination_channel.into(),
            body,
        }
    }

    pub fn auth(token: &str) -> Self {
        Self::new(AUTH_DESTINATION, json!({ "token": token }))
    }

    pub fn join(channel: &ChannelKey) -> Self {
        Self::new(JOIN_DESTINATION, json!({ "channel": channel.to_string() }))
    }

    pub fn leave(channel: &ChannelKey) -> Self {
        Self::new(LEAVE_DESTINATION, json!({ "channel": channel.to_string() }))
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a frame previously produced by [`OutboundFrame::encode`].
    pub fn parse(raw: &str) -> Option<Self> {
        let Value::Object(mut map) = serde_json::from_str::<Value>(raw).ok()? else {
            return None;
        };
        let destination_channel = match map.remove("destinationChannel")? {
            Value::String(destination) => destination,
            _ => return None,
        };
        let body = map.remove("body").unwrap_or_else(|| Value::Object(Map::new()));
        Some(Self {
            destination_channel,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConversationId, MessageId, MessageKind};

    #[test]
    fn decodes_message_created() {
        let raw = r#"{"type":"MessageCreated","payload":{"id":"m1","conversationId":"42","senderId":"u1","content":"hi","type":"text","timestamp":100}}"#;
        let InboundFrame::Event { channel, event } = decode(raw).unwrap() else {
            panic!("expected an event frame");
        };
        assert!(channel.is_none());
        match event {
            DomainEvent::MessageCreated(message) => {
                assert_eq!(message.id, MessageId::new("m1"));
                assert_eq!(message.conversation_id, ConversationId::new("42"));
                assert_eq!(message.timestamp, 100);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn message_kinds_are_lenient() {
        let kind_of = |kind: &str| {
            let raw = format!(
                r#"{{"type":"MessageCreated","payload":{{"id":"m1","conversationId":"42","senderId":"u1","type":"{kind}","timestamp":100}}}}"#
            );
            match decode(&raw).unwrap() {
                InboundFrame::Event {
                    event: DomainEvent::MessageCreated(message),
                    ..
                } => message.kind,
                other => panic!("unexpected frame {other:?}"),
            }
        };

        assert_eq!(kind_of("IMAGE"), MessageKind::Image);
        assert_eq!(kind_of("File"), MessageKind::File);
        assert_eq!(kind_of("sticker"), MessageKind::Other);
    }

    #[test]
    fn unknown_tag_is_unrecognized_not_an_error() {
        let frame = decode(r#"{"type":"StoryPosted","payload":{"whatever":1}}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Event {
                channel: None,
                event: DomainEvent::Unrecognized {
                    tag: "StoryPosted".into()
                },
            }
        );
    }

    #[test]
    fn tags_are_case_sensitive() {
        let frame = decode(r#"{"type":"messagecreated","payload":{}}"#).unwrap();
        assert!(matches!(
            frame,
            InboundFrame::Event {
                event: DomainEvent::Unrecognized { .. },
                ..
            }
        ));
    }

    #[test]
    fn missing_type_is_a_decode_error() {
        let err = decode(r#"{"payload":{"id":"m1"}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("type")));
    }

    #[test]
    fn missing_required_payload_field_is_a_decode_error() {
        let err = decode(r#"{"type":"MessageCreated","payload":{"id":"m1"}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { .. }));
        assert!(decode("not json").is_err());
        assert!(matches!(decode("[1,2]"), Err(DecodeError::NotAnObject)));
    }

    #[test]
    fn empty_frames_are_heartbeats() {
        assert_eq!(decode("").unwrap(), InboundFrame::Heartbeat);
        assert_eq!(decode("\n").unwrap(), InboundFrame::Heartbeat);
        assert_eq!(decode("{}").unwrap(), InboundFrame::Heartbeat);
    }

    #[test]
    fn decodes_control_frames() {
        assert_eq!(
            decode(r#"{"type":"AuthAccepted"}"#).unwrap(),
            InboundFrame::Control(ControlFrame::AuthAccepted)
        );
        assert_eq!(
            decode(r#"{"type":"AuthRejected","payload":{"reason":"expired"}}"#).unwrap(),
            InboundFrame::Control(ControlFrame::AuthRejected {
                reason: "expired".into()
            })
        );
        assert_eq!(
            decode(r#"{"type":"ChannelJoined","payload":{"channel":"presence"}}"#).unwrap(),
            InboundFrame::Control(ControlFrame::ChannelJoined {
                channel: ChannelKey::Presence
            })
        );
    }

    #[test]
    fn frame_channel_is_parsed() {
        let raw = r#"{"type":"PresenceChanged","channel":"presence","payload":{"userId":"u1","online":true}}"#;
        let InboundFrame::Event { channel, .. } = decode(raw).unwrap() else {
            panic!("expected an event frame");
        };
        assert_eq!(channel, Some(ChannelKey::Presence));
    }

    #[test]
    fn outbound_frames_use_destination_shape() {
        let frame = OutboundFrame::join(&ChannelKey::conversation("42"));
        let encoded = frame.encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["destinationChannel"], "join");
        assert_eq!(value["body"]["channel"], "conversation:42");
        assert_eq!(OutboundFrame::parse(&encoded), Some(frame));
    }
}
