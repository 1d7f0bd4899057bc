//! Per-key expiry timers for typing indicators.

use super::reconcile::{TypingEffect, TypingKey};
use super::{StoreInner, SyncStore};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

struct ArmedTimer {
    generation: u64,
    task: JoinHandle<()>,
}

/// Owns one sleeping task per `(conversation, user)` key.
///
/// Generations only move forward: an effect older than the armed timer is
/// ignored, so effects applied out of order cannot resurrect a stale timer.
pub(crate) struct TypingTimers {
    expiry: Duration,
    armed: Mutex<HashMap<TypingKey, ArmedTimer>>,
}

impl TypingTimers {
    pub(crate) fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            armed: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn apply(&self, effect: TypingEffect, store: Weak<StoreInner>) {
        match effect {
            TypingEffect::Arm { key, generation } => self.arm(key, generation, store),
            TypingEffect::Cancel { key, generation } => self.cancel(&key, generation),
        }
    }

    fn arm(&self, key: TypingKey, generation: u64, store: Weak<StoreInner>) {
        let Ok(runtime) = Handle::try_current() else {
            debug!("no async runtime, typing indicator will not expire locally");
            return;
        };

        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        if armed
            .get(&key)
            .is_some_and(|timer| timer.generation > generation)
        {
            return;
        }

        let expiry = self.expiry;
        let timer_key = key.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(expiry).await;
            if let Some(inner) = store.upgrade() {
                SyncStore { inner }.expire_typing(&timer_key, generation);
            }
        });

        if let Some(previous) = armed.insert(key, ArmedTimer { generation, task }) {
            previous.task.abort();
        }
    }

    fn cancel(&self, key: &TypingKey, generation: u64) {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        let stale = armed
            .get(key)
            .is_some_and(|timer| timer.generation < generation);
        if stale {
            if let Some(timer) = armed.remove(key) {
                timer.task.abort();
            }
        }
    }

    /// Forgets the timer that just fired, unless it was replaced meanwhile.
    pub(crate) fn finished(&self, key: &TypingKey, generation: u64) {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        if armed
            .get(key)
            .is_some_and(|timer| timer.generation == generation)
        {
            armed.remove(key);
        }
    }

    pub(crate) fn armed_count(&self) -> usize {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for TypingTimers {
    fn drop(&mut self) {
        let armed = self.armed.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, timer) in armed.drain() {
            timer.task.abort();
        }
    }
}
