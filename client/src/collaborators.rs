//! Services the sync engine consumes but does not own.

use async_trait::async_trait;
use chatsync_messaging::{Conversation, ConversationId, Message, NotificationRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::warn;

/// One page of a paginated pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    /// Server-side unread total, when the endpoint reports one.
    #[serde(default)]
    pub unread_total: Option<u32>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            has_more: false,
            unread_total: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationFilter {
    #[default]
    All,
    Unread,
    Groups,
}

/// Paginated request/response API used for initial loads and backfill.
///
/// Pages are zero-based. Message pages run newest first.
#[async_trait]
pub trait PullApi: Send + Sync {
    async fn fetch_conversations_page(
        &self,
        filter: ConversationFilter,
        page: u32,
    ) -> anyhow::Result<Page<Conversation>>;

    async fn fetch_messages_page(
        &self,
        conversation_id: &ConversationId,
        page: u32,
    ) -> anyhow::Result<Page<Message>>;

    async fn fetch_notifications_page(
        &self,
        _page: u32,
    ) -> anyhow::Result<Page<NotificationRecord>> {
        Ok(Page::last(Vec::new()))
    }
}

/// An auth token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(..)")
    }
}

/// Supplies the token for the auth handshake and hears when it is refused.
pub trait CredentialSource: Send + Sync {
    fn current_credential(&self) -> Option<Credential>;

    fn credential_rejected(&self, reason: &str);
}

/// A fixed token, e.g. from the environment.
///
/// A rejection discards it until [`StaticCredential::replace`] supplies a new one.
#[derive(Debug, Default)]
pub struct StaticCredential {
    current: RwLock<Option<Credential>>,
}

impl StaticCredential {
    pub fn new(token: Option<String>) -> Self {
        Self {
            current: RwLock::new(token.map(Credential::new)),
        }
    }

    pub fn replace(&self, token: impl Into<String>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Credential::new(token));
    }
}

impl CredentialSource for StaticCredential {
    fn current_credential(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn credential_rejected(&self, reason: &str) {
        warn!(%reason, "credential rejected, discarding it");
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
