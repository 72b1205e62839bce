//! Fan-out of published messages.
//!
//! The dispatcher turns one `publish` call into mailbox deliveries and gate
//! wake-ups. It holds the publisher's sequence lock for the whole fan-out, so
//! two threads publishing from the same service cannot interleave their
//! sequence numbers with their enqueue order.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{BusError, BusResult};
use crate::registry::validate_topic;
use crate::service::ServiceCell;

use super::{Message, SubscriptionTable};

/// Resolves subscriber names to live services.
///
/// Names that no longer resolve (a subscriber stopped between the snapshot
/// and the lookup) are skipped.
pub(crate) trait Directory {
    fn resolve(&self, names: &[String]) -> BusResult<Vec<Arc<ServiceCell>>>;
}

pub(crate) struct Dispatcher<'a, D: Directory> {
    directory: &'a D,
    subscriptions: &'a SubscriptionTable,
}

impl<'a, D: Directory> Dispatcher<'a, D> {
    pub(crate) fn new(directory: &'a D, subscriptions: &'a SubscriptionTable) -> Self {
        Self {
            directory,
            subscriptions,
        }
    }

    /// Validate, number and fan out one message from `publisher`.
    pub(crate) fn publish(
        &self,
        publisher: &ServiceCell,
        topic: &str,
        args: Vec<Value>,
    ) -> BusResult<Arc<Message>> {
        validate_topic(topic)?;
        publisher.kind.check_publish(topic, args.len())?;

        let mut sequence = publisher
            .sequence
            .lock()
            .map_err(|_| BusError::LockPoisoned("publisher sequence"))?;

        let subscribers = self.subscriptions.snapshot(&publisher.name, topic)?;
        let targets = self.directory.resolve(&subscribers)?;

        *sequence += 1;
        let message = Arc::new(Message::new(
            publisher.name.as_str(),
            topic,
            args,
            *sequence,
        ));

        let mut delivered = 0usize;
        for target in &targets {
            if target.deliver(Arc::clone(&message)).accepted() {
                delivered += 1;
            }
        }

        // Listeners see their owner's own publications. A self-subscription
        // already put the message in the owner's mailbox.
        let self_subscribed = subscribers.iter().any(|name| *name == publisher.name);
        if !self_subscribed
            && publisher.listeners.has_topic(topic)
            && publisher.deliver(Arc::clone(&message)).accepted()
        {
            delivered += 1;
        }

        let woken = publisher.gate.notify(&message);
        drop(sequence);

        debug!(
            service = %publisher.name,
            topic,
            sequence = message.sequence,
            subscribers = targets.len(),
            delivered,
            waiters = woken,
            "published"
        );
        Ok(message)
    }
}
