//! Pull drivers: fetch pages over the request/response API and merge them
//! into the store through the same reconciliation rules as pushed events.

use crate::collaborators::{ConversationFilter, PullApi};
use crate::storage::SyncStore;
use anyhow::Context;
use chatsync_messaging::ConversationId;
use tracing::{debug, info};

/// Upper bound on conversation pages walked by one refresh.
pub const MAX_CONVERSATION_PAGES: u32 = 50;

/// Walks conversation pages from the first until the server reports no more.
pub async fn refresh_conversations(
    api: &dyn PullApi,
    store: &SyncStore,
    filter: ConversationFilter,
) -> anyhow::Result<usize> {
    let mut total = 0;
    for page in 0..MAX_CONVERSATION_PAGES {
        let fetched = api
            .fetch_conversations_page(filter, page)
            .await
            .with_context(|| format!("failed to fetch conversations page {page}"))?;
        total += fetched.items.len();
        store.apply_conversations_page(fetched.items);
        if !fetched.has_more {
            break;
        }
    }
    info!(conversations = total, ?filter, "conversations refreshed");
    Ok(total)
}

/// Loads one page of message history. Returns whether older pages remain.
pub async fn load_messages(
    api: &dyn PullApi,
    store: &SyncStore,
    conversation_id: &ConversationId,
    page: u32,
) -> anyhow::Result<bool> {
    let fetched = api
        .fetch_messages_page(conversation_id, page)
        .await
        .with_context(|| format!("failed to fetch messages of {conversation_id} page {page}"))?;
    debug!(%conversation_id, page, count = fetched.items.len(), "message page fetched");
    store.apply_pulled_page(conversation_id, fetched.items, fetched.has_more);
    Ok(fetched.has_more)
}

pub async fn load_notifications(
    api: &dyn PullApi,
    store: &SyncStore,
    page: u32,
) -> anyhow::Result<bool> {
    let fetched = api
        .fetch_notifications_page(page)
        .await
        .with_context(|| format!("failed to fetch notifications page {page}"))?;
    store.apply_notifications_page(fetched.items, fetched.unread_total);
    Ok(fetched.has_more)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Page;
    use async_trait::async_trait;
    use chatsync_messaging::{Conversation, DomainEvent, Message, NotificationRecord};
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeApi {
        conversations: Vec<Page<Conversation>>,
        messages: HashMap<ConversationId, Vec<Page<Message>>>,
        notifications: Vec<Page<NotificationRecord>>,
    }

    fn page_at<T: Clone>(pages: &[Page<T>], page: u32) -> anyhow::Result<Page<T>> {
        pages
            .get(page as usize)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no page {page}"))
    }

    #[async_trait]
    impl PullApi for FakeApi {
        async fn fetch_conversations_page(
            &self,
            _filter: ConversationFilter,
            page: u32,
        ) -> anyhow::Result<Page<Conversation>> {
            page_at(&self.conversations, page)
        }

        async fn fetch_messages_page(
            &self,
            conversation_id: &ConversationId,
            page: u32,
        ) -> anyhow::Result<Page<Message>> {
            page_at(
                self.messages.get(conversation_id).map_or(&[][..], Vec::as_slice),
                page,
            )
        }

        async fn fetch_notifications_page(
            &self,
            page: u32,
        ) -> anyhow::Result<Page<NotificationRecord>> {
            page_at(&self.notifications, page)
        }
    }

    fn message(id: &str, ts: i64, content: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: "u2".into(),
            content: content.into(),
            kind: Default::default(),
            timestamp: ts,
            is_read: false,
            is_edited: false,
        }
    }

    fn page<T>(items: Vec<T>, has_more: bool) -> Page<T> {
        Page {
            items,
            has_more,
            unread_total: None,
        }
    }

    #[tokio::test]
    async fn refresh_walks_every_page() {
        let api = FakeApi {
            conversations: vec![
                page(vec![Conversation::new("c1"), Conversation::new("c2")], true),
                page(vec![Conversation::new("c3")], false),
                page(vec![Conversation::new("never")], false),
            ],
            ..FakeApi::default()
        };
        let store = SyncStore::default();

        let count = refresh_conversations(&api, &store, ConversationFilter::All)
            .await
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(store.conversations().len(), 3);
        assert!(store.conversation(&"never".into()).is_none());
    }

    #[tokio::test]
    async fn pulled_history_does_not_clobber_pushed_messages() {
        let store = SyncStore::default();
        store.apply_event(DomainEvent::MessageCreated(message("m1", 100, "pushed")));

        let api = FakeApi {
            messages: HashMap::from([(
                ConversationId::new("c1"),
                vec![page(
                    vec![message("m1", 100, "stale"), message("m0", 50, "older")],
                    true,
                )],
            )]),
            ..FakeApi::default()
        };

        let more = load_messages(&api, &store, &"c1".into(), 0).await.unwrap();
        assert!(more);

        let contents: Vec<_> = store
            .messages(&"c1".into())
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["older", "pushed"]);
    }

    #[tokio::test]
    async fn fetch_errors_leave_the_store_untouched() {
        let store = SyncStore::default();
        let err = load_messages(&FakeApi::default(), &store, &"c1".into(), 3)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("page 3"));
        assert!(store.messages(&"c1".into()).is_empty());
    }

    #[tokio::test]
    async fn notification_pages_carry_the_unread_total() {
        let store = SyncStore::default();
        let record = NotificationRecord {
            id: "n1".into(),
            kind: "mention".into(),
            read: false,
            actor: None,
            timestamp: 10,
            message: None,
        };
        let api = FakeApi {
            notifications: vec![Page {
                items: vec![record],
                has_more: false,
                unread_total: Some(7),
            }],
            ..FakeApi::default()
        };

        assert!(!load_notifications(&api, &store, 0).await.unwrap());
        assert_eq!(store.notifications().len(), 1);
        assert_eq!(store.unread_notification_count(), 7);
    }
}
