//! Who listens to whom: publisher → topic → subscribers.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::error::{BusError, BusResult};

/// One standing registration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Subscription {
    pub publisher: String,
    pub topic: String,
    pub subscriber: String,
}

type Topics = HashMap<String, BTreeSet<String>>;

/// Many-to-many subscription table shared by every service of a registry.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    by_publisher: RwLock<HashMap<String, Topics>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> BusResult<RwLockReadGuard<'_, HashMap<String, Topics>>> {
        self.by_publisher
            .read()
            .map_err(|_| BusError::LockPoisoned("subscription read"))
    }

    fn write(&self) -> BusResult<RwLockWriteGuard<'_, HashMap<String, Topics>>> {
        self.by_publisher
            .write()
            .map_err(|_| BusError::LockPoisoned("subscription write"))
    }

    /// Register interest. Returns `false` if it was already present.
    pub fn subscribe(&self, subscriber: &str, publisher: &str, topic: &str) -> BusResult<bool> {
        let mut table = self.write()?;
        Ok(table
            .entry(publisher.to_string())
            .or_default()
            .entry(topic.to_string())
            .or_default()
            .insert(subscriber.to_string()))
    }

    /// Remove interest. Returns `false` if there was nothing to remove.
    pub fn unsubscribe(&self, subscriber: &str, publisher: &str, topic: &str) -> BusResult<bool> {
        let mut table = self.write()?;
        let Some(topics) = table.get_mut(publisher) else {
            return Ok(false);
        };
        let Some(subscribers) = topics.get_mut(topic) else {
            return Ok(false);
        };
        let removed = subscribers.remove(subscriber);
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        if topics.is_empty() {
            table.remove(publisher);
        }
        Ok(removed)
    }

    /// Current subscribers of `(publisher, topic)`, copied out so the caller
    /// holds no lock while delivering.
    pub fn snapshot(&self, publisher: &str, topic: &str) -> BusResult<Vec<String>> {
        let table = self.read()?;
        Ok(table
            .get(publisher)
            .and_then(|topics| topics.get(topic))
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Every subscription `subscriber` holds.
    pub fn subscriptions_of(&self, subscriber: &str) -> BusResult<Vec<Subscription>> {
        let table = self.read()?;
        let mut found: Vec<Subscription> = table
            .iter()
            .flat_map(|(publisher, topics)| {
                topics.iter().filter_map(move |(topic, subscribers)| {
                    subscribers.contains(subscriber).then(|| Subscription {
                        publisher: publisher.clone(),
                        topic: topic.clone(),
                        subscriber: subscriber.to_string(),
                    })
                })
            })
            .collect();
        found.sort();
        Ok(found)
    }

    /// Every subscription in the table, sorted.
    pub fn all(&self) -> BusResult<Vec<Subscription>> {
        let table = self.read()?;
        let mut found: Vec<Subscription> = table
            .iter()
            .flat_map(|(publisher, topics)| {
                topics.iter().flat_map(move |(topic, subscribers)| {
                    subscribers.iter().map(move |subscriber| Subscription {
                        publisher: publisher.clone(),
                        topic: topic.clone(),
                        subscriber: subscriber.clone(),
                    })
                })
            })
            .collect();
        found.sort();
        Ok(found)
    }

    /// Drop every subscription where `service` is either endpoint.
    /// Returns how many were removed.
    pub fn remove_service(&self, service: &str) -> BusResult<usize> {
        let mut table = self.write()?;
        let mut removed = table
            .remove(service)
            .map(|topics| topics.values().map(BTreeSet::len).sum::<usize>())
            .unwrap_or(0);

        table.retain(|_, topics| {
            topics.retain(|_, subscribers| {
                if subscribers.remove(service) {
                    removed += 1;
                }
                !subscribers.is_empty()
            });
            !topics.is_empty()
        });

        Ok(removed)
    }

    /// Forget everything.
    pub fn clear(&self) -> BusResult<usize> {
        let mut table = self.write()?;
        let count = table
            .values()
            .flat_map(|topics| topics.values())
            .map(BTreeSet::len)
            .sum();
        table.clear();
        Ok(count)
    }

    pub fn len(&self) -> BusResult<usize> {
        let table = self.read()?;
        Ok(table
            .values()
            .flat_map(|topics| topics.values())
            .map(BTreeSet::len)
            .sum())
    }

    pub fn is_empty(&self) -> BusResult<bool> {
        Ok(self.len()? == 0)
    }
}
