//! Synchronization store: the single owner of every cached entity.
//!
//! All mutation goes through one lock per operation so readers never observe
//! a conversation whose `lastMessage` moved while its message list did not.
//! Reads hand out cloned snapshots.

mod reconcile;
mod typing;

use chatsync_messaging::{
    Conversation, ConversationId, DomainEvent, Message, NotificationId, NotificationRecord,
    PresenceRecord, TypingIndicator, UserId,
};
use reconcile::{Outcome, StoreState};
pub(crate) use reconcile::TypingKey;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use typing::TypingTimers;

/// Tuning for the synchronization store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Silence after which a typing indicator is evicted locally.
    pub typing_expiry: Duration,
    /// Capacity of the change feed.
    pub update_buffer: usize,
    /// Messages sent by this user never raise the unread counter.
    pub local_user: Option<UserId>,
}

impl StoreConfig {
    pub fn with_local_user(mut self, user: impl Into<UserId>) -> Self {
        self.local_user = Some(user.into());
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            typing_expiry: Duration::from_secs(2),
            update_buffer: 256,
            local_user: None,
        }
    }
}

/// Coarse change notifications; collaborators re-read the matching snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUpdate {
    Conversations,
    Messages(ConversationId),
    Typing(ConversationId),
    Presence(UserId),
    Notifications,
}

pub(crate) struct StoreInner {
    state: Mutex<StoreState>,
    timers: TypingTimers,
    updates: broadcast::Sender<StoreUpdate>,
}

#[derive(Clone)]
pub struct SyncStore {
    inner: Arc<StoreInner>,
}

impl SyncStore {
    pub fn new(config: StoreConfig) -> Self {
        let (updates, _rx) = broadcast::channel(config.update_buffer.max(1));
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::new(config.local_user)),
                timers: TypingTimers::new(config.typing_expiry),
                updates,
            }),
        }
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<StoreUpdate> {
        self.inner.updates.subscribe()
    }

    /// Merge a page of messages fetched over request/response.
    pub fn apply_pulled_page(
        &self,
        conversation_id: &ConversationId,
        messages: Vec<Message>,
        has_more_pages: bool,
    ) {
        let outcome = self
            .state()
            .merge_page(conversation_id, messages, has_more_pages);
        self.publish(outcome);
    }

    /// Upsert a page of conversations fetched over request/response.
    pub fn apply_conversations_page(&self, conversations: Vec<Conversation>) {
        let outcome = self.state().merge_conversations(conversations);
        self.publish(outcome);
    }

    /// Upsert a page of notifications. `unread_total` is the server's count
    /// when known; otherwise the counter is recomputed from the cache.
    pub fn apply_notifications_page(
        &self,
        records: Vec<NotificationRecord>,
        unread_total: Option<u32>,
    ) {
        let outcome = self.state().merge_notifications(records, unread_total);
        self.publish(outcome);
    }

    /// Apply one decoded push event.
    pub fn apply_event(&self, event: DomainEvent) {
        let outcome = self.state().apply_event(event);
        self.publish(outcome);
    }

    /// The only operation that zeroes a conversation's unread counter.
    pub fn mark_conversation_read(&self, conversation_id: &ConversationId) {
        let outcome = self.state().mark_read(conversation_id);
        self.publish(outcome);
    }

    /// Record the conversation currently on screen, or none.
    pub fn focus(&self, conversation_id: Option<ConversationId>) {
        self.state().focused = conversation_id;
    }

    pub fn focused(&self) -> Option<ConversationId> {
        self.state().focused.clone()
    }

    pub fn remove_notification(&self, id: &NotificationId) {
        let outcome = self.state().remove_notification(id);
        self.publish(outcome);
    }

    pub fn mark_all_notifications_read(&self) {
        let outcome = self.state().mark_all_notifications_read();
        self.publish(outcome);
    }

    /// Conversations, most recently updated first.
    pub fn conversations(&self) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> =
            self.state().conversations.values().cloned().collect();
        conversations.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        conversations
    }

    pub fn conversation(&self, conversation_id: &ConversationId) -> Option<Conversation> {
        self.state().conversations.get(conversation_id).cloned()
    }

    /// Cached messages in ascending timestamp order.
    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.state()
            .messages
            .get(conversation_id)
            .map(|list| list.messages.clone())
            .unwrap_or_default()
    }

    /// Whether the last pulled page reported older pages; `true` when nothing
    /// has been pulled yet.
    pub fn has_more_messages(&self, conversation_id: &ConversationId) -> bool {
        self.state()
            .messages
            .get(conversation_id)
            .map_or(true, |list| list.has_more)
    }

    pub fn typing_indicators(&self, conversation_id: &ConversationId) -> Vec<TypingIndicator> {
        self.state()
            .typing
            .iter()
            .filter(|(key, _)| &key.conversation_id == conversation_id)
            .map(|(_, entry)| entry.indicator.clone())
            .collect()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.state()
            .presence
            .get(user_id)
            .is_some_and(|record| record.online)
    }

    pub fn presence(&self, user_id: &UserId) -> Option<PresenceRecord> {
        self.state().presence.get(user_id).cloned()
    }

    /// Notifications, newest first.
    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.state().notifications.clone()
    }

    pub fn unread_notification_count(&self) -> u32 {
        self.state().unread_notifications
    }

    pub(crate) fn expire_typing(&self, key: &TypingKey, generation: u64) {
        let outcome = self.state().expire_typing(key, generation);
        self.inner.timers.finished(key, generation);
        self.publish(outcome);
    }

    #[cfg(test)]
    pub(crate) fn armed_typing_timers(&self) -> usize {
        self.inner.timers.armed_count()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, outcome: Outcome) {
        if let Some(effect) = outcome.typing {
            self.inner
                .timers
                .apply(effect, Arc::downgrade(&self.inner));
        }
        for update in outcome.updates {
            let _ = self.inner.updates.send(update);
        }
    }
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
