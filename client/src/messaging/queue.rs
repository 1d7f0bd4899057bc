//! FIFO of intents awaiting a live connection.

use super::Intent;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

/// Shared queue of outbound intents.
///
/// Producers enqueue from anywhere; the connection runtime drains it while
/// live and removes an entry only once the transport accepted it.
#[derive(Clone)]
pub struct OutboundIntentQueue {
    queue: Arc<RwLock<VecDeque<QueuedIntent>>>,
    notify: Arc<Notify>,
}

#[derive(Debug, Clone)]
pub struct QueuedIntent {
    pub id: Uuid,
    pub intent: Intent,
    pub attempts: usize,
    pub queued_at: Instant,
}

impl QueuedIntent {
    pub fn age(&self) -> Duration {
        self.queued_at.elapsed()
    }

    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.intent.is_typing() && self.age() > ttl
    }
}

impl OutboundIntentQueue {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(RwLock::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Appends an intent, replacing any queued one it supersedes.
    pub async fn enqueue(&self, intent: Intent) -> Uuid {
        let queued = QueuedIntent {
            id: Uuid::new_v4(),
            intent,
            attempts: 0,
            queued_at: Instant::now(),
        };
        let id = queued.id;

        {
            let mut queue = self.queue.write().await;
            queue.retain(|existing| !queued.intent.supersedes(&existing.intent));
            queue.push_back(queued);
        }
        self.notify.notify_one();
        id
    }

    /// Get the next intent without removing it.
    pub async fn peek(&self) -> Option<QueuedIntent> {
        self.queue.read().await.front().cloned()
    }

    pub async fn remove(&self, id: &Uuid) -> Option<QueuedIntent> {
        let mut queue = self.queue.write().await;
        let pos = queue.iter().position(|queued| queued.id == *id)?;
        queue.remove(pos)
    }

    pub async fn mark_attempted(&self, id: &Uuid) {
        let mut queue = self.queue.write().await;
        if let Some(queued) = queue.iter_mut().find(|queued| queued.id == *id) {
            queued.attempts += 1;
        }
    }

    /// Drops typing intents older than `ttl` and returns them.
    pub async fn prune_stale(&self, ttl: Duration) -> Vec<QueuedIntent> {
        let mut queue = self.queue.write().await;
        let (stale, fresh): (VecDeque<_>, VecDeque<_>) =
            queue.drain(..).partition(|queued| queued.is_stale(ttl));
        *queue = fresh;
        stale.into()
    }

    pub async fn snapshot(&self) -> Vec<QueuedIntent> {
        self.queue.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.queue.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.read().await.is_empty()
    }

    /// Resolves after the next enqueue, or at once if one happened unobserved.
    pub(crate) async fn ready(&self) {
        self.notify.notified().await;
    }
}

impl Default for OutboundIntentQueue {
    fn default() -> Self {
        Self::new()
    }
}
