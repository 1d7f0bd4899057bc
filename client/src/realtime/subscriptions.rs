//! Channel subscriptions and event fan-out.

use chatsync_messaging::{ChannelKey, DomainEvent, EventRoute};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Receives the events delivered on a subscribed channel.
pub trait EventHandler: Send + Sync {
    fn handle(&self, channel: &ChannelKey, event: &DomainEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&ChannelKey, &DomainEvent) + Send + Sync,
{
    fn handle(&self, channel: &ChannelKey, event: &DomainEvent) {
        self(channel, event)
    }
}

/// Returned by a subscribe; hand it back to release that reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    key: ChannelKey,
    token: u64,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }
}

/// What releasing a handle did to its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The handle was unknown or already released.
    Unknown,
    /// Other references keep the channel declared.
    StillHeld,
    /// The last reference went away.
    Released { was_joined: bool },
}

struct HandlerSlot {
    handler: Arc<dyn EventHandler>,
    tokens: HashSet<u64>,
}

#[derive(Default)]
struct ChannelEntry {
    slots: Vec<HandlerSlot>,
}

impl ChannelEntry {
    fn refcount(&self) -> usize {
        self.slots.iter().map(|slot| slot.tokens.len()).sum()
    }
}

/// Declared channels with their handlers, plus which of them the server has
/// confirmed on the current connection.
///
/// Each declaration is reference counted per key. Registering a handler that
/// is already attached to the key only adds a reference, so one event reaches
/// each distinct handler once.
#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: BTreeMap<ChannelKey, ChannelEntry>,
    joined: HashSet<ChannelKey>,
    next_token: u64,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("declared", &self.channels.keys().collect::<Vec<_>>())
            .field("joined", &self.joined)
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares interest in `key`; the bool is true when the key is new.
    pub fn subscribe(
        &mut self,
        key: ChannelKey,
        handler: Arc<dyn EventHandler>,
    ) -> (SubscriptionHandle, bool) {
        self.next_token += 1;
        let token = self.next_token;

        let first = !self.channels.contains_key(&key);
        let entry = self.channels.entry(key.clone()).or_default();
        match entry
            .slots
            .iter_mut()
            .find(|slot| same_handler(&slot.handler, &handler))
        {
            Some(slot) => {
                slot.tokens.insert(token);
            }
            None => entry.slots.push(HandlerSlot {
                handler,
                tokens: HashSet::from([token]),
            }),
        }

        (SubscriptionHandle { key, token }, first)
    }

    /// Releases one reference. Releasing twice is a no-op.
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Release {
        let Some(entry) = self.channels.get_mut(&handle.key) else {
            return Release::Unknown;
        };

        let mut removed = false;
        entry.slots.retain_mut(|slot| {
            removed |= slot.tokens.remove(&handle.token);
            !slot.tokens.is_empty()
        });
        if !removed {
            return Release::Unknown;
        }
        if !entry.slots.is_empty() {
            return Release::StillHeld;
        }

        self.channels.remove(&handle.key);
        Release::Released {
            was_joined: self.joined.remove(&handle.key),
        }
    }

    pub fn is_declared(&self, key: &ChannelKey) -> bool {
        self.channels.contains_key(key)
    }

    pub fn declared(&self) -> BTreeSet<ChannelKey> {
        self.channels.keys().cloned().collect()
    }

    pub fn refcount(&self, key: &ChannelKey) -> usize {
        self.channels.get(key).map_or(0, ChannelEntry::refcount)
    }

    /// Records a server join ack. Acks for undeclared keys are ignored.
    pub fn mark_joined(&mut self, key: &ChannelKey) -> bool {
        if !self.channels.contains_key(key) {
            return false;
        }
        self.joined.insert(key.clone())
    }

    pub fn is_joined(&self, key: &ChannelKey) -> bool {
        self.joined.contains(key)
    }

    /// Forgets server-side state; declarations survive.
    pub fn clear_joined(&mut self) {
        self.joined.clear();
    }

    /// Delivers `event` to the handlers of the channel it belongs to.
    ///
    /// A frame naming its channel goes to that channel. Otherwise the event's
    /// natural channel is used, falling back to the user inbox which carries
    /// everything addressed to the user. Returns the number of handler calls.
    pub fn dispatch(&self, channel: Option<&ChannelKey>, event: &DomainEvent) -> usize {
        let targets: Vec<&ChannelKey> = match channel {
            Some(key) => self
                .channels
                .get_key_value(key)
                .map(|(k, _)| k)
                .into_iter()
                .collect(),
            None => match event.route() {
                EventRoute::Channel(key) if self.channels.contains_key(&key) => self
                    .channels
                    .get_key_value(&key)
                    .map(|(k, _)| k)
                    .into_iter()
                    .collect(),
                EventRoute::Channel(_) | EventRoute::UserInbox => self
                    .channels
                    .keys()
                    .filter(|key| key.is_user_inbox())
                    .collect(),
            },
        };

        let mut delivered = 0;
        for key in targets {
            let Some(entry) = self.channels.get(key) else {
                continue;
            };
            for slot in &entry.slots {
                slot.handler.handle(key, event);
                delivered += 1;
            }
        }

        if delivered == 0 {
            debug!(tag = event.tag(), "no subscriber for event, dropping");
        } else {
            trace!(tag = event.tag(), delivered, "event dispatched");
        }
        delivered
    }
}

fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
