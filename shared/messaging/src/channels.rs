//! Structured keys naming the logical push topics.

use crate::{ConversationId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const USER_INBOX_PREFIX: &str = "user-inbox:";
const CONVERSATION_PREFIX: &str = "conversation:";
const PRESENCE: &str = "presence";

/// A logical push channel.
///
/// Textual forms are `user-inbox:{userId}`, `conversation:{id}` and `presence`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelKey {
    UserInbox(UserId),
    Conversation(ConversationId),
    Presence,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelKeyError {
    #[error("unknown channel key: {0}")]
    Unknown(String),
    #[error("channel key {0} has an empty id")]
    EmptyId(String),
}

impl ChannelKey {
    pub fn user_inbox(user_id: impl Into<UserId>) -> Self {
        Self::UserInbox(user_id.into())
    }

    pub fn conversation(conversation_id: impl Into<ConversationId>) -> Self {
        Self::Conversation(conversation_id.into())
    }

    pub fn is_user_inbox(&self) -> bool {
        matches!(self, Self::UserInbox(_))
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::UserInbox(user) => write!(f, "{USER_INBOX_PREFIX}{user}"),
            ChannelKey::Conversation(conversation) => {
                write!(f, "{CONVERSATION_PREFIX}{conversation}")
            }
            ChannelKey::Presence => f.write_str(PRESENCE),
        }
    }
}

impl FromStr for ChannelKey {
    type Err = ChannelKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == PRESENCE {
            return Ok(Self::Presence);
        }
        if let Some(user) = s.strip_prefix(USER_INBOX_PREFIX) {
            if user.is_empty() {
                return Err(ChannelKeyError::EmptyId(s.to_owned()));
            }
            return Ok(Self::UserInbox(UserId::new(user)));
        }
        if let Some(conversation) = s.strip_prefix(CONVERSATION_PREFIX) {
            if conversation.is_empty() {
                return Err(ChannelKeyError::EmptyId(s.to_owned()));
            }
            return Ok(Self::Conversation(ConversationId::new(conversation)));
        }
        Err(ChannelKeyError::Unknown(s.to_owned()))
    }
}

impl TryFrom<String> for ChannelKey {
    type Error = ChannelKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelKey> for String {
    fn from(key: ChannelKey) -> Self {
        key.to_string()
    }
}
