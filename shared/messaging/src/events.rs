//! Typed server-pushed occurrences.

use crate::model::{Conversation, Message, NotificationRecord};
use crate::{ChannelKey, ConversationId, MessageId, NotificationId, UserId};
use serde::{Deserialize, Serialize};

pub const MESSAGE_CREATED: &str = "MessageCreated";
pub const MESSAGE_UPDATED: &str = "MessageUpdated";
pub const MESSAGE_DELETED: &str = "MessageDeleted";
pub const CONVERSATION_CREATED: &str = "ConversationCreated";
pub const CONVERSATION_UPDATED: &str = "ConversationUpdated";
pub const TYPING_CHANGED: &str = "TypingChanged";
pub const PRESENCE_CHANGED: &str = "PresenceChanged";
pub const NOTIFICATION_CREATED: &str = "NotificationCreated";
pub const NOTIFICATION_STATUS_CHANGED: &str = "NotificationStatusChanged";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: MessageId,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingChange {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub is_typing: bool,
    #[serde(default, alias = "ts")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub user_id: UserId,
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStatus {
    pub id: NotificationId,
    #[serde(alias = "isRead")]
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    MessageCreated(Message),
    MessageUpdated(Message),
    MessageDeleted(MessageRef),
    ConversationCreated(Conversation),
    ConversationUpdated(Conversation),
    TypingChanged(TypingChange),
    PresenceChanged(PresenceChange),
    NotificationCreated(NotificationRecord),
    NotificationStatusChanged(NotificationStatus),
    /// A tag this client does not know. Callers log and drop it.
    Unrecognized { tag: String },
}

/// Where an event is delivered when the frame does not name a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    Channel(ChannelKey),
    /// Whichever `user-inbox:*` channel is declared locally.
    UserInbox,
}

impl DomainEvent {
    pub fn tag(&self) -> &str {
        match self {
            DomainEvent::MessageCreated(_) => MESSAGE_CREATED,
            DomainEvent::MessageUpdated(_) => MESSAGE_UPDATED,
            DomainEvent::MessageDeleted(_) => MESSAGE_DELETED,
            DomainEvent::ConversationCreated(_) => CONVERSATION_CREATED,
            DomainEvent::ConversationUpdated(_) => CONVERSATION_UPDATED,
            DomainEvent::TypingChanged(_) => TYPING_CHANGED,
            DomainEvent::PresenceChanged(_) => PRESENCE_CHANGED,
            DomainEvent::NotificationCreated(_) => NOTIFICATION_CREATED,
            DomainEvent::NotificationStatusChanged(_) => NOTIFICATION_STATUS_CHANGED,
            DomainEvent::Unrecognized { tag } => tag,
        }
    }

    pub fn route(&self) -> EventRoute {
        match self {
            DomainEvent::MessageCreated(message) | DomainEvent::MessageUpdated(message) => {
                EventRoute::Channel(ChannelKey::Conversation(message.conversation_id.clone()))
            }
            DomainEvent::MessageDeleted(reference) => {
                EventRoute::Channel(ChannelKey::Conversation(reference.conversation_id.clone()))
            }
            DomainEvent::TypingChanged(change) => {
                EventRoute::Channel(ChannelKey::Conversation(change.conversation_id.clone()))
            }
            DomainEvent::PresenceChanged(_) => EventRoute::Channel(ChannelKey::Presence),
            DomainEvent::ConversationCreated(_)
            | DomainEvent::ConversationUpdated(_)
            | DomainEvent::NotificationCreated(_)
            | DomainEvent::NotificationStatusChanged(_)
            | DomainEvent::Unrecognized { .. } => EventRoute::UserInbox,
        }
    }
}
