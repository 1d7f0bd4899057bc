//! Domain model and push-channel codec shared by ChatSync clients.
//!
//! Every persisted entity is identified by an opaque id minted by the server.
//! The ids decode from either JSON strings or integers and are held as strings.

pub mod channels;
pub mod codec;
pub mod events;
pub mod model;

pub use channels::{ChannelKey, ChannelKeyError};
pub use codec::{decode, ControlFrame, DecodeError, InboundFrame, OutboundFrame, HEARTBEAT_FRAME};
pub use events::{DomainEvent, EventRoute, MessageRef, NotificationStatus, PresenceChange, TypingChange};
pub use model::{
    Conversation, LastMessage, Message, MessageKind, NotificationRecord, Participant,
    PresenceRecord, TypingIndicator,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire representation of an id before it is normalised to a string.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(from = "RawId", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<RawId> for $name {
            fn from(raw: RawId) -> Self {
                Self(raw.into_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id!(
    /// Server-assigned identifier of a conversation.
    ConversationId
);
opaque_id!(
    /// Server-assigned identifier of a message.
    MessageId
);
opaque_id!(
    /// Server-assigned identifier of a user.
    UserId
);
opaque_id!(
    /// Server-assigned identifier of a notification.
    NotificationId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_strings_and_integers() {
        let text: ConversationId = serde_json::from_str("\"42\"").unwrap();
        let number: ConversationId = serde_json::from_str("42").unwrap();
        assert_eq!(text, number);
        assert_eq!(number.as_str(), "42");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = UserId::new("u-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"u-7\"");
    }
}
