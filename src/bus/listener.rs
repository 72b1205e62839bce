//! Direct in-process callbacks keyed by topic.
//!
//! A listener is a one-hop subscription: the owning service's worker calls it
//! for every message on its topic that reaches the owner's mailbox,
//! including the owner's own publications on that topic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{BusError, BusResult, ListenerError};
use crate::service::ServiceHandle;

use super::Message;

/// Callback signature shared by listeners and kind methods.
pub type Callback =
    Arc<dyn Fn(&ServiceHandle, &Message) -> Result<(), ListenerError> + Send + Sync>;

/// Identifies one listener registration for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

struct ListenerEntry {
    id: ListenerId,
    topic: String,
    callback: Callback,
}

/// Listener registrations of one service, in registration order.
#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: AtomicU64,
    entries: RwLock<Vec<ListenerEntry>>,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, topic: &str, callback: Callback) -> BusResult<ListenerId> {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries
            .write()
            .map_err(|_| BusError::LockPoisoned("listener add"))?
            .push(ListenerEntry {
                id,
                topic: topic.to_string(),
                callback,
            });
        Ok(id)
    }

    pub(crate) fn remove(&self, id: ListenerId) -> BusResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| BusError::LockPoisoned("listener remove"))?;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        Ok(entries.len() != before)
    }

    /// Callbacks for `topic`, cloned out so they run without the lock held.
    pub(crate) fn for_topic(&self, topic: &str) -> Vec<(ListenerId, Callback)> {
        match self.entries.read() {
            Ok(entries) => entries
                .iter()
                .filter(|entry| entry.topic == topic)
                .map(|entry| (entry.id, Arc::clone(&entry.callback)))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub(crate) fn has_topic(&self, topic: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.iter().any(|entry| entry.topic == topic))
            .unwrap_or(false)
    }

    pub(crate) fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .entries
            .read()
            .map(|entries| entries.iter().map(|entry| entry.topic.clone()).collect())
            .unwrap_or_default();
        topics.sort();
        topics.dedup();
        topics
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }
}
