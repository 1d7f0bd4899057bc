//! Outbound intents: client actions sent over the push connection.

mod queue;

pub use queue::{OutboundIntentQueue, QueuedIntent};

use chatsync_messaging::{ChannelKey, ConversationId, OutboundFrame};
use serde_json::json;

pub const PRESENCE_HEARTBEAT_DESTINATION: &str = "presence/heartbeat";

/// A client action waiting to be sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Typing {
        conversation_id: ConversationId,
        is_typing: bool,
    },
    MarkRead {
        conversation_id: ConversationId,
    },
    PresenceHeartbeat,
}

impl Intent {
    pub fn typing_start(conversation_id: impl Into<ConversationId>) -> Self {
        Self::Typing {
            conversation_id: conversation_id.into(),
            is_typing: true,
        }
    }

    pub fn typing_stop(conversation_id: impl Into<ConversationId>) -> Self {
        Self::Typing {
            conversation_id: conversation_id.into(),
            is_typing: false,
        }
    }

    pub fn mark_read(conversation_id: impl Into<ConversationId>) -> Self {
        Self::MarkRead {
            conversation_id: conversation_id.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Intent::Typing { is_typing: true, .. } => "typing-start",
            Intent::Typing { is_typing: false, .. } => "typing-stop",
            Intent::MarkRead { .. } => "mark-read",
            Intent::PresenceHeartbeat => "presence-heartbeat",
        }
    }

    /// Typing intents go stale; everything else is sent however late.
    pub fn is_typing(&self) -> bool {
        matches!(self, Intent::Typing { .. })
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Intent::Typing {
                conversation_id, ..
            }
            | Intent::MarkRead { conversation_id } => Some(conversation_id),
            Intent::PresenceHeartbeat => None,
        }
    }

    /// True when sending `self` makes an already queued `other` pointless.
    pub fn supersedes(&self, other: &Intent) -> bool {
        match (self, other) {
            (Intent::PresenceHeartbeat, Intent::PresenceHeartbeat) => true,
            (Intent::Typing { .. }, Intent::Typing { .. })
            | (Intent::MarkRead { .. }, Intent::MarkRead { .. }) => {
                self.conversation_id() == other.conversation_id()
            }
            _ => false,
        }
    }

    pub fn to_frame(&self) -> OutboundFrame {
        match self {
            Intent::Typing {
                conversation_id,
                is_typing,
            } => OutboundFrame::new(
                format!("{}/typing", ChannelKey::Conversation(conversation_id.clone())),
                json!({ "conversationId": conversation_id, "isTyping": is_typing }),
            ),
            Intent::MarkRead { conversation_id } => OutboundFrame::new(
                format!("{}/read", ChannelKey::Conversation(conversation_id.clone())),
                json!({ "conversationId": conversation_id }),
            ),
            Intent::PresenceHeartbeat => {
                OutboundFrame::new(PRESENCE_HEARTBEAT_DESTINATION, json!({}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_frame_targets_the_conversation() {
        let frame = Intent::typing_start("c1").to_frame();
        assert_eq!(frame.destination_channel, "conversation:c1/typing");
        assert_eq!(frame.body, json!({ "conversationId": "c1", "isTyping": true }));
    }

    #[test]
    fn mark_read_frame_carries_the_conversation() {
        let frame = Intent::mark_read("c1").to_frame();
        assert_eq!(frame.destination_channel, "conversation:c1/read");
        assert_eq!(frame.body["conversationId"], "c1");
    }

    #[test]
    fn only_same_kind_and_target_supersede() {
        assert!(Intent::typing_stop("c1").supersedes(&Intent::typing_start("c1")));
        assert!(!Intent::typing_stop("c1").supersedes(&Intent::typing_start("c2")));
        assert!(!Intent::mark_read("c1").supersedes(&Intent::typing_start("c1")));
        assert!(Intent::PresenceHeartbeat.supersedes(&Intent::PresenceHeartbeat));
    }
}
