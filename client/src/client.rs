//! Facade wiring the store, the push connection and the intent queue together.

use crate::collaborators::{ConversationFilter, CredentialSource, PullApi};
use crate::messaging::{Intent, OutboundIntentQueue};
use crate::realtime::{
    ConnectionStatus, Connector, EventHandler, RealtimeConfig, RealtimeHandle, RealtimeResult,
    SubscriptionHandle,
};
use crate::storage::{StoreConfig, StoreUpdate, SyncStore};
use crate::sync;
use chatsync_messaging::{
    ChannelKey, Conversation, ConversationId, DomainEvent, Message, NotificationId,
    NotificationRecord, TypingIndicator, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Applies every event delivered on a channel to the store.
pub struct StoreHandler {
    store: SyncStore,
}

impl StoreHandler {
    pub fn new(store: SyncStore) -> Self {
        Self { store }
    }
}

impl EventHandler for StoreHandler {
    fn handle(&self, _channel: &ChannelKey, event: &DomainEvent) {
        self.store.apply_event(event.clone());
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_id: UserId,
    pub realtime: RealtimeConfig,
    pub store: StoreConfig,
}

impl ClientConfig {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            realtime: RealtimeConfig::default(),
            store: StoreConfig::default(),
        }
    }

    pub fn with_realtime(mut self, realtime: RealtimeConfig) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}

/// The sync engine as seen by UI code.
///
/// Reads are served from the store; user actions update the store
/// optimistically where that makes sense and queue an intent for the server.
pub struct SyncClient {
    user_id: UserId,
    store: SyncStore,
    intents: OutboundIntentQueue,
    realtime: RealtimeHandle,
    handler: Arc<dyn EventHandler>,
    open: Mutex<HashMap<ConversationId, SubscriptionHandle>>,
    pull: Option<Arc<dyn PullApi>>,
}

impl SyncClient {
    /// Starts the engine and declares the user inbox and presence channels.
    /// The connection stays down until [`SyncClient::connect`].
    pub async fn start(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
    ) -> RealtimeResult<Self> {
        let store = SyncStore::new(config.store.with_local_user(config.user_id.clone()));
        let intents = OutboundIntentQueue::new();
        let realtime =
            RealtimeHandle::start(config.realtime, connector, credentials, intents.clone());
        let handler: Arc<dyn EventHandler> = Arc::new(StoreHandler::new(store.clone()));

        realtime
            .subscribe(ChannelKey::user_inbox(config.user_id.clone()), handler.clone())
            .await?;
        realtime
            .subscribe(ChannelKey::Presence, handler.clone())
            .await?;

        info!(user_id = %config.user_id, "sync client started");
        Ok(Self {
            user_id: config.user_id,
            store,
            intents,
            realtime,
            handler,
            open: Mutex::new(HashMap::new()),
            pull: None,
        })
    }

    pub fn with_pull_api(mut self, api: Arc<dyn PullApi>) -> Self {
        self.pull = Some(api);
        self
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    pub fn intents(&self) -> &OutboundIntentQueue {
        &self.intents
    }

    pub async fn connect(&self) -> RealtimeResult<()> {
        self.realtime.connect().await
    }

    pub async fn disconnect(&self) -> RealtimeResult<()> {
        self.realtime.disconnect().await
    }

    pub async fn credential_invalidated(&self) -> RealtimeResult<()> {
        self.realtime.credential_invalidated().await
    }

    pub fn status(&self) -> ConnectionStatus {
        self.realtime.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.realtime.watch_status()
    }

    pub fn updates(&self) -> broadcast::Receiver<StoreUpdate> {
        self.store.subscribe_updates()
    }

    pub fn get_conversations(&self) -> Vec<Conversation> {
        self.store.conversations()
    }

    pub fn get_messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.store.messages(conversation_id)
    }

    pub fn get_typing_indicators(
        &self,
        conversation_id: &ConversationId,
    ) -> Vec<TypingIndicator> {
        self.store.typing_indicators(conversation_id)
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.store.is_online(user_id)
    }

    pub fn get_notifications(&self) -> Vec<NotificationRecord> {
        self.store.notifications()
    }

    pub fn get_unread_notification_count(&self) -> u32 {
        self.store.unread_notification_count()
    }

    pub async fn send_typing_start(&self, conversation_id: &ConversationId) -> Uuid {
        self.intents
            .enqueue(Intent::typing_start(conversation_id.clone()))
            .await
    }

    pub async fn send_typing_stop(&self, conversation_id: &ConversationId) -> Uuid {
        self.intents
            .enqueue(Intent::typing_stop(conversation_id.clone()))
            .await
    }

    /// Zeroes the local unread count and tells the server.
    pub async fn mark_read(&self, conversation_id: &ConversationId) -> Uuid {
        self.store.mark_conversation_read(conversation_id);
        self.intents
            .enqueue(Intent::mark_read(conversation_id.clone()))
            .await
    }

    /// Records which conversation the user is viewing and subscribes to it.
    ///
    /// The previously focused conversation's channel is released once the new
    /// one is open, so only the conversation on screen stays subscribed.
    pub async fn focus(&self, conversation_id: Option<ConversationId>) -> RealtimeResult<()> {
        let previous = self.store.focused();
        self.store.focus(conversation_id.clone());
        if let Some(conversation_id) = &conversation_id {
            self.open_conversation(conversation_id).await?;
        }
        match previous {
            Some(previous) if Some(&previous) != conversation_id.as_ref() => {
                self.close_conversation(&previous).await
            }
            _ => Ok(()),
        }
    }

    /// Subscribes to a conversation channel once, however often it is opened.
    pub async fn open_conversation(&self, conversation_id: &ConversationId) -> RealtimeResult<()> {
        let mut open = self.open.lock().await;
        if open.contains_key(conversation_id) {
            return Ok(());
        }
        let handle = self
            .realtime
            .subscribe(
                ChannelKey::Conversation(conversation_id.clone()),
                Arc::clone(&self.handler),
            )
            .await?;
        open.insert(conversation_id.clone(), handle);
        debug!(%conversation_id, "conversation opened");
        Ok(())
    }

    pub async fn close_conversation(&self, conversation_id: &ConversationId) -> RealtimeResult<()> {
        let handle = self.open.lock().await.remove(conversation_id);
        if let Some(handle) = handle {
            self.realtime.unsubscribe(handle).await?;
            debug!(%conversation_id, "conversation closed");
        }
        if self.store.focused().as_ref() == Some(conversation_id) {
            self.store.focus(None);
        }
        Ok(())
    }

    pub fn remove_notification(&self, id: &NotificationId) {
        self.store.remove_notification(id);
    }

    pub fn mark_all_notifications_read(&self) {
        self.store.mark_all_notifications_read();
    }

    /// Pulls every conversation page; fails when no pull API is attached.
    pub async fn refresh_conversations(&self, filter: ConversationFilter) -> anyhow::Result<usize> {
        let api = self.pull_api()?;
        sync::refresh_conversations(api.as_ref(), &self.store, filter).await
    }

    pub async fn load_messages(
        &self,
        conversation_id: &ConversationId,
        page: u32,
    ) -> anyhow::Result<bool> {
        let api = self.pull_api()?;
        sync::load_messages(api.as_ref(), &self.store, conversation_id, page).await
    }

    pub async fn load_notifications(&self, page: u32) -> anyhow::Result<bool> {
        let api = self.pull_api()?;
        sync::load_notifications(api.as_ref(), &self.store, page).await
    }

    pub async fn shutdown(&self) -> RealtimeResult<()> {
        self.realtime.shutdown().await
    }

    fn pull_api(&self) -> anyhow::Result<Arc<dyn PullApi>> {
        self.pull
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no pull api configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticCredential;
    use crate::realtime::memory::{memory_pair, MemoryServer};
    use crate::realtime::ConnectionPhase;
    use serde_json::json;
    use std::time::Duration;

    async fn client() -> (SyncClient, MemoryServer) {
        let (connector, server) = memory_pair();
        let config = ClientConfig::new("me")
            .with_realtime(RealtimeConfig::default().with_presence_interval(None));
        let client = SyncClient::start(
            config,
            Arc::new(connector),
            Arc::new(StaticCredential::new(Some("token".into()))),
        )
        .await
        .unwrap();
        (client, server)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_events_reach_the_store() {
        let (client, mut server) = client().await;
        client.connect().await.unwrap();
        let mut session = server.accept().await.unwrap();
        let joined = session.handshake(2).await.unwrap();
        assert!(joined.contains(&ChannelKey::user_inbox("me")));
        assert!(joined.contains(&ChannelKey::Presence));

        session.send_event(
            "MessageCreated",
            json!({"id": "m1", "conversationId": "c1", "senderId": "u2", "timestamp": 5}),
        );
        session.send_event("PresenceChanged", json!({"userId": "u2", "online": true}));
        settle().await;

        assert_eq!(client.get_messages(&"c1".into()).len(), 1);
        assert_eq!(client.get_conversations()[0].unread_count, 1);
        assert!(client.is_online(&"u2".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn mark_read_is_local_first_and_queued() {
        let (client, _server) = client().await;
        client.store().apply_event(DomainEvent::MessageCreated(
            serde_json::from_value(json!({
                "id": "m1", "conversationId": "c1", "senderId": "u2", "timestamp": 5
            }))
            .unwrap(),
        ));

        client.mark_read(&"c1".into()).await;

        assert_eq!(client.get_conversations()[0].unread_count, 0);
        let queued = client.intents().snapshot().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].intent, Intent::mark_read("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn focusing_twice_subscribes_once() {
        let (client, mut server) = client().await;
        client.connect().await.unwrap();
        let mut session = server.accept().await.unwrap();
        session.handshake(2).await.unwrap();
        let mut status = client.watch_status();
        status
            .wait_for(|s| s.phase == ConnectionPhase::Live)
            .await
            .unwrap();

        client.focus(Some("c1".into())).await.unwrap();
        client.focus(Some("c1".into())).await.unwrap();
        settle().await;

        let joins: Vec<_> = session
            .drain_frames()
            .into_iter()
            .filter(|frame| frame.destination_channel == "join")
            .collect();
        assert_eq!(joins.len(), 1);
        assert_eq!(client.store().focused(), Some("c1".into()));

        client.close_conversation(&"c1".into()).await.unwrap();
        assert_eq!(client.store().focused(), None);
    }

    #[tokio::test]
    async fn pulls_need_an_api() {
        let (client, _server) = client().await;
        assert!(client.load_messages(&"c1".into(), 0).await.is_err());
    }
}
