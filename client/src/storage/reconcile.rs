//! Merge rules between pulled pages and pushed events.
//!
//! Everything here runs under the store lock and never fails: ordering
//! inversions and unknown ids are expected and degrade to logged no-ops.

use super::StoreUpdate;
use chatsync_messaging::{
    Conversation, ConversationId, DomainEvent, LastMessage, Message, MessageId, MessageRef,
    NotificationId, NotificationRecord, NotificationStatus, PresenceChange, PresenceRecord,
    TypingChange, TypingIndicator, UserId,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub(crate) struct MessageList {
    pub(crate) messages: Vec<Message>,
    pub(crate) has_more: bool,
}

impl MessageList {
    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|message| &message.id == id)
    }

    fn sort(&mut self) {
        self.messages.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct TypingKey {
    pub(crate) conversation_id: ConversationId,
    pub(crate) user_id: UserId,
}

#[derive(Debug)]
pub(crate) struct TypingEntry {
    pub(crate) indicator: TypingIndicator,
    pub(crate) generation: u64,
}

/// Timer work produced by a typing change, applied after the lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TypingEffect {
    Arm { key: TypingKey, generation: u64 },
    Cancel { key: TypingKey, generation: u64 },
}

#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub(crate) updates: Vec<StoreUpdate>,
    pub(crate) typing: Option<TypingEffect>,
}

impl Outcome {
    fn push(&mut self, update: StoreUpdate) {
        if !self.updates.contains(&update) {
            self.updates.push(update);
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) conversations: HashMap<ConversationId, Conversation>,
    pub(crate) messages: HashMap<ConversationId, MessageList>,
    pub(crate) typing: BTreeMap<TypingKey, TypingEntry>,
    pub(crate) presence: HashMap<UserId, PresenceRecord>,
    /// Newest first.
    pub(crate) notifications: Vec<NotificationRecord>,
    pub(crate) unread_notifications: u32,
    pub(crate) focused: Option<ConversationId>,
    pub(crate) local_user: Option<UserId>,
    typing_generation: u64,
}

impl StoreState {
    pub(crate) fn new(local_user: Option<UserId>) -> Self {
        Self {
            local_user,
            ..Self::default()
        }
    }

    /// Union by id; an existing record wins unless the pulled copy is strictly newer.
    pub(crate) fn merge_page(
        &mut self,
        conversation_id: &ConversationId,
        page: Vec<Message>,
        has_more: bool,
    ) -> Outcome {
        let mut outcome = Outcome::default();
        let list = self.messages.entry(conversation_id.clone()).or_default();

        let mut index: HashMap<MessageId, usize> = list
            .messages
            .iter()
            .enumerate()
            .map(|(idx, message)| (message.id.clone(), idx))
            .collect();

        for incoming in page {
            if &incoming.conversation_id != conversation_id {
                warn!(
                    message_id = %incoming.id,
                    expected = %conversation_id,
                    actual = %incoming.conversation_id,
                    "pulled message belongs to another conversation, skipping"
                );
                continue;
            }
            match index.get(&incoming.id) {
                Some(&idx) => {
                    let existing = &mut list.messages[idx];
                    if existing.timestamp >= incoming.timestamp {
                        debug!(message_id = %incoming.id, "cached message is newer or equal, keeping it");
                    } else {
                        *existing = incoming;
                    }
                }
                None => {
                    index.insert(incoming.id.clone(), list.messages.len());
                    list.messages.push(incoming);
                }
            }
        }

        list.sort();
        list.has_more = has_more;
        let newest = list.newest().map(Message::pointer);
        outcome.push(StoreUpdate::Messages(conversation_id.clone()));

        if let (Some(pointer), Some(conversation)) =
            (newest, self.conversations.get_mut(conversation_id))
        {
            if advance_last_message(conversation, pointer) {
                outcome.push(StoreUpdate::Conversations);
            }
        }
        outcome
    }

    pub(crate) fn merge_conversations(&mut self, conversations: Vec<Conversation>) -> Outcome {
        let mut outcome = Outcome::default();
        for conversation in conversations {
            self.upsert_conversation(conversation, &mut outcome);
        }
        outcome
    }

    pub(crate) fn merge_notifications(
        &mut self,
        records: Vec<NotificationRecord>,
        unread_total: Option<u32>,
    ) -> Outcome {
        for record in records {
            match self.notification_position(&record.id) {
                Some(idx) => self.notifications[idx] = record,
                None => self.notifications.push(record),
            }
        }
        self.notifications
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.unread_notifications = unread_total.unwrap_or_else(|| {
            self.notifications.iter().filter(|n| !n.read).count() as u32
        });

        let mut outcome = Outcome::default();
        outcome.push(StoreUpdate::Notifications);
        outcome
    }

    pub(crate) fn apply_event(&mut self, event: DomainEvent) -> Outcome {
        let mut outcome = Outcome::default();
        match event {
            DomainEvent::MessageCreated(message) => self.insert_message(message, &mut outcome),
            DomainEvent::MessageUpdated(message) => self.replace_message(message, &mut outcome),
            DomainEvent::MessageDeleted(reference) => {
                self.remove_message(reference, &mut outcome)
            }
            DomainEvent::ConversationCreated(conversation)
            | DomainEvent::ConversationUpdated(conversation) => {
                self.upsert_conversation(conversation, &mut outcome)
            }
            DomainEvent::TypingChanged(change) => self.apply_typing(change, &mut outcome),
            DomainEvent::PresenceChanged(change) => self.apply_presence(change, &mut outcome),
            DomainEvent::NotificationCreated(record) => {
                self.upsert_notification(record, &mut outcome)
            }
            DomainEvent::NotificationStatusChanged(status) => {
                self.apply_notification_status(status, &mut outcome)
            }
            DomainEvent::Unrecognized { tag } => {
                debug!(%tag, "dropping unrecognized event");
            }
        }
        outcome
    }

    pub(crate) fn mark_read(&mut self, conversation_id: &ConversationId) -> Outcome {
        let mut outcome = Outcome::default();
        match self.conversations.get_mut(conversation_id) {
            Some(conversation) => {
                conversation.unread_count = 0;
                outcome.push(StoreUpdate::Conversations);
            }
            None => debug!(%conversation_id, "mark read for uncached conversation"),
        }
        if let Some(list) = self.messages.get_mut(conversation_id) {
            for message in list.messages.iter_mut() {
                message.is_read = true;
            }
            outcome.push(StoreUpdate::Messages(conversation_id.clone()));
        }
        outcome
    }

    pub(crate) fn remove_notification(&mut self, id: &NotificationId) -> Outcome {
        let mut outcome = Outcome::default();
        match self.notification_position(id) {
            Some(idx) => {
                let removed = self.notifications.remove(idx);
                if !removed.read {
                    self.unread_notifications = self.unread_notifications.saturating_sub(1);
                }
                outcome.push(StoreUpdate::Notifications);
            }
            None => debug!(notification_id = %id, "remove for unknown notification"),
        }
        outcome
    }

    pub(crate) fn mark_all_notifications_read(&mut self) -> Outcome {
        for record in self.notifications.iter_mut() {
            record.read = true;
        }
        self.unread_notifications = 0;
        let mut outcome = Outcome::default();
        outcome.push(StoreUpdate::Notifications);
        outcome
    }

    /// Removes an indicator only if no newer start event re-armed it.
    pub(crate) fn expire_typing(&mut self, key: &TypingKey, generation: u64) -> Outcome {
        let mut outcome = Outcome::default();
        let current = self.typing.get(key).map(|entry| entry.generation);
        if current == Some(generation) {
            self.typing.remove(key);
            debug!(conversation_id = %key.conversation_id, user_id = %key.user_id, "typing indicator expired");
            outcome.push(StoreUpdate::Typing(key.conversation_id.clone()));
        }
        outcome
    }

    fn insert_message(&mut self, message: Message, outcome: &mut Outcome) {
        let conversation_id = message.conversation_id.clone();
        let list = self.messages.entry(conversation_id.clone()).or_default();
        if list.position(&message.id).is_some() {
            debug!(message_id = %message.id, "duplicate message event ignored");
            return;
        }

        let pointer = message.pointer();
        let from_local_user = self.local_user.as_ref() == Some(&message.sender_id);
        let at = list
            .messages
            .partition_point(|existing| existing.sort_key() <= message.sort_key());
        list.messages.insert(at, message);
        outcome.push(StoreUpdate::Messages(conversation_id.clone()));

        let focused = self.focused.as_ref() == Some(&conversation_id);
        let conversation = self
            .conversations
            .entry(conversation_id.clone())
            .or_insert_with(|| {
                debug!(%conversation_id, "message for uncached conversation, caching a stub");
                Conversation::new(conversation_id.clone())
            });
        advance_last_message(conversation, pointer);
        if !focused && !from_local_user {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }
        outcome.push(StoreUpdate::Conversations);
    }

    fn replace_message(&mut self, mut message: Message, outcome: &mut Outcome) {
        let conversation_id = message.conversation_id.clone();
        let Some(list) = self.messages.get_mut(&conversation_id) else {
            warn!(message_id = %message.id, %conversation_id, "update for message in uncached conversation ignored");
            return;
        };
        let Some(idx) = list.position(&message.id) else {
            warn!(message_id = %message.id, %conversation_id, "update for unknown message ignored");
            return;
        };

        message.is_read |= list.messages[idx].is_read;
        let reorder = list.messages[idx].timestamp != message.timestamp;
        let replaced = message.clone();
        list.messages[idx] = message;
        if reorder {
            list.sort();
        }
        outcome.push(StoreUpdate::Messages(conversation_id.clone()));

        if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
            let points_here = conversation
                .last_message
                .as_ref()
                .is_some_and(|last| last.id == replaced.id);
            if points_here {
                conversation.last_message = Some(replaced.pointer());
                outcome.push(StoreUpdate::Conversations);
            }
        }
    }

    fn remove_message(&mut self, reference: MessageRef, outcome: &mut Outcome) {
        let Some(list) = self.messages.get_mut(&reference.conversation_id) else {
            debug!(message_id = %reference.id, "delete for uncached conversation ignored");
            return;
        };
        let Some(idx) = list.position(&reference.id) else {
            debug!(message_id = %reference.id, "delete for unknown message ignored");
            return;
        };
        list.messages.remove(idx);
        let newest = list.newest().map(Message::pointer);
        outcome.push(StoreUpdate::Messages(reference.conversation_id.clone()));

        if let Some(conversation) = self.conversations.get_mut(&reference.conversation_id) {
            let points_here = conversation
                .last_message
                .as_ref()
                .is_some_and(|last| last.id == reference.id);
            if points_here {
                conversation.last_message = newest;
                outcome.push(StoreUpdate::Conversations);
            }
        }
    }

    fn upsert_conversation(&mut self, mut incoming: Conversation, outcome: &mut Outcome) {
        incoming.dedup_participants();
        for participant in incoming.participants.iter_mut() {
            if let Some(record) = self.presence.get(&participant.user_id) {
                participant.online = record.online;
            }
        }

        match self.conversations.get_mut(&incoming.id) {
            Some(existing) => {
                let unread_count = existing.unread_count;
                let last_message = newer_pointer(existing.last_message.take(), incoming.last_message.take());
                let updated_at = existing.updated_at.max(incoming.updated_at);
                *existing = Conversation {
                    unread_count,
                    last_message,
                    updated_at,
                    ..incoming
                };
            }
            None => {
                self.conversations.insert(incoming.id.clone(), incoming);
            }
        }
        outcome.push(StoreUpdate::Conversations);
    }

    fn apply_typing(&mut self, change: TypingChange, outcome: &mut Outcome) {
        let key = TypingKey {
            conversation_id: change.conversation_id.clone(),
            user_id: change.user_id.clone(),
        };
        self.typing_generation += 1;
        let generation = self.typing_generation;

        if change.is_typing {
            let indicator = TypingIndicator {
                conversation_id: change.conversation_id,
                user_id: change.user_id,
                is_typing: true,
                timestamp: change.timestamp,
            };
            self.typing.insert(
                key.clone(),
                TypingEntry {
                    indicator,
                    generation,
                },
            );
            outcome.typing = Some(TypingEffect::Arm {
                key: key.clone(),
                generation,
            });
            outcome.push(StoreUpdate::Typing(key.conversation_id));
        } else {
            if self.typing.remove(&key).is_some() {
                outcome.push(StoreUpdate::Typing(key.conversation_id.clone()));
            }
            outcome.typing = Some(TypingEffect::Cancel { key, generation });
        }
    }

    fn apply_presence(&mut self, change: PresenceChange, outcome: &mut Outcome) {
        let PresenceChange {
            user_id,
            online,
            last_seen,
        } = change;

        let mut fanned_out = false;
        for conversation in self.conversations.values_mut() {
            for participant in conversation.participants.iter_mut() {
                if participant.user_id == user_id && participant.online != online {
                    participant.online = online;
                    fanned_out = true;
                }
            }
        }

        let record = self
            .presence
            .entry(user_id.clone())
            .or_insert_with(|| PresenceRecord {
                user_id: user_id.clone(),
                online,
                last_seen: None,
            });
        record.online = online;
        if last_seen.is_some() {
            record.last_seen = last_seen;
        }

        outcome.push(StoreUpdate::Presence(user_id));
        if fanned_out {
            outcome.push(StoreUpdate::Conversations);
        }
    }

    fn upsert_notification(&mut self, record: NotificationRecord, outcome: &mut Outcome) {
        match self.notification_position(&record.id) {
            Some(idx) => {
                let was_unread = !self.notifications[idx].read;
                let is_unread = !record.read;
                self.adjust_unread_notifications(was_unread, is_unread);
                self.notifications.remove(idx);
                self.insert_notification_sorted(record);
            }
            None => {
                if !record.read {
                    self.unread_notifications = self.unread_notifications.saturating_add(1);
                }
                self.insert_notification_sorted(record);
            }
        }
        outcome.push(StoreUpdate::Notifications);
    }

    fn apply_notification_status(&mut self, status: NotificationStatus, outcome: &mut Outcome) {
        let Some(idx) = self.notification_position(&status.id) else {
            warn!(notification_id = %status.id, "status change for unknown notification ignored");
            return;
        };
        let was_unread = !self.notifications[idx].read;
        self.notifications[idx].read = status.read;
        self.adjust_unread_notifications(was_unread, !status.read);
        outcome.push(StoreUpdate::Notifications);
    }

    fn adjust_unread_notifications(&mut self, was_unread: bool, is_unread: bool) {
        match (was_unread, is_unread) {
            (true, false) => {
                if self.unread_notifications == 0 {
                    warn!("unread notification counter would go negative, clamping at zero");
                }
                self.unread_notifications = self.unread_notifications.saturating_sub(1);
            }
            (false, true) => {
                self.unread_notifications = self.unread_notifications.saturating_add(1);
            }
            _ => {}
        }
    }

    fn insert_notification_sorted(&mut self, record: NotificationRecord) {
        let at = self
            .notifications
            .partition_point(|existing| existing.timestamp >= record.timestamp);
        self.notifications.insert(at, record);
    }

    fn notification_position(&self, id: &NotificationId) -> Option<usize> {
        self.notifications.iter().position(|record| &record.id == id)
    }
}

/// Moves `lastMessage`/`updatedAt` forward; never backwards.
fn advance_last_message(conversation: &mut Conversation, pointer: LastMessage) -> bool {
    let advances = conversation
        .last_message
        .as_ref()
        .map_or(true, |current| pointer.timestamp >= current.timestamp && pointer != *current);
    if advances {
        conversation.updated_at = conversation.updated_at.max(pointer.timestamp);
        conversation.last_message = Some(pointer);
    }
    advances
}

fn newer_pointer(local: Option<LastMessage>, remote: Option<LastMessage>) -> Option<LastMessage> {
    match (local, remote) {
        (Some(local), Some(remote)) => {
            if remote.timestamp > local.timestamp {
                Some(remote)
            } else {
                Some(local)
            }
        }
        (local, remote) => local.or(remote),
    }
}
