//! Cached entities mirrored from the server.

use crate::{ConversationId, MessageId, NotificationId, RawId, UserId};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

/// Content type of a message. Matched case-insensitively; kinds this client
/// does not know decode as `Other` so the message itself is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
    Other,
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_ascii_lowercase().as_str() {
            "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            "file" => MessageKind::File,
            "system" => MessageKind::System,
            _ => MessageKind::Other,
        })
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Server timestamp in milliseconds.
    #[serde(alias = "ts")]
    pub timestamp: i64,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_edited: bool,
}

impl Message {
    /// Ordering key inside a conversation: ascending timestamp, ties broken by id.
    pub fn sort_key(&self) -> (i64, &MessageId) {
        (self.timestamp, &self.id)
    }

    pub fn pointer(&self) -> LastMessage {
        LastMessage {
            id: self.id.clone(),
            timestamp: self.timestamp,
            sender_id: Some(self.sender_id.clone()),
            preview: Some(self.content.clone()),
        }
    }
}

/// Denormalised pointer to the most recent message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: MessageId,
    #[serde(alias = "ts")]
    pub timestamp: i64,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default, alias = "content")]
    pub preview: Option<String>,
}

/// Participant view of a conversation member.
///
/// `online` is a projection of the presence records and is rewritten locally
/// whenever presence changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawParticipant")]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub online: bool,
}

impl Participant {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            online: false,
        }
    }
}

/// Participants arrive either as bare ids or as full objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawParticipant {
    Id(RawId),
    #[serde(rename_all = "camelCase")]
    Full {
        #[serde(alias = "id")]
        user_id: UserId,
        #[serde(default, alias = "name", alias = "username")]
        display_name: Option<String>,
        #[serde(default)]
        online: bool,
    },
}

impl From<RawParticipant> for Participant {
    fn from(raw: RawParticipant) -> Self {
        match raw {
            RawParticipant::Id(id) => Participant::new(UserId::from(id)),
            RawParticipant::Full {
                user_id,
                display_name,
                online,
            } => Participant {
                user_id,
                display_name,
                online,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub updated_at: i64,
}

impl Conversation {
    pub fn new(id: impl Into<ConversationId>) -> Self {
        Self {
            id: id.into(),
            participants: Vec::new(),
            is_group: false,
            name: None,
            last_message: None,
            unread_count: 0,
            updated_at: 0,
        }
    }

    /// Drops repeated participants, keeping the first occurrence of each user.
    pub fn dedup_participants(&mut self) {
        let mut seen = HashSet::new();
        self.participants
            .retain(|participant| seen.insert(participant.user_id.clone()));
    }
}

/// Keyed by `(conversation_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub is_typing: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, alias = "isRead")]
    pub read: bool,
    #[serde(default, alias = "actorId")]
    pub actor: Option<UserId>,
    #[serde(alias = "ts", alias = "createdAt")]
    pub timestamp: i64,
    #[serde(default)]
    pub message: Option<String>,
}
