use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::bus::{ListenerId, Message, Subscription};
use crate::error::{BusError, BusResult, ListenerError};
use crate::gate::{PendingWait, WaitOptions, WaitOutcome};
use crate::registry::{validate_topic, RegistryInner};

use super::cell::ServiceCell;
use super::worker::{ListenerFault, ServiceStats};

/// Cheap, cloneable reference to a running service.
///
/// Handles stay valid after the service stops; operations on a stopped
/// service fail with [`BusError::ServiceStopped`] (or return
/// [`WaitOutcome::Canceled`] for waits).
#[derive(Clone)]
pub struct ServiceHandle {
    registry: Arc<RegistryInner>,
    cell: Arc<ServiceCell>,
}

impl ServiceHandle {
    pub(crate) fn new(registry: Arc<RegistryInner>, cell: Arc<ServiceCell>) -> Self {
        Self { registry, cell }
    }

    pub(crate) fn cell(&self) -> &ServiceCell {
        &self.cell
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Name of the kind this service was started from.
    pub fn kind(&self) -> &str {
        self.cell.kind.name()
    }

    pub fn is_running(&self) -> bool {
        self.cell.is_running()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.cell.started_at
    }

    fn ensure_running(&self) -> BusResult<()> {
        if self.cell.is_running() {
            Ok(())
        } else {
            Err(BusError::ServiceStopped(self.cell.name.clone()))
        }
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Publish `args` on `topic` from this service.
    ///
    /// Returns once the message is in every subscriber's mailbox; it never
    /// waits for subscribers to process it.
    pub fn publish(&self, topic: &str, args: Vec<Value>) -> BusResult<Arc<Message>> {
        self.ensure_running()?;
        self.registry.publish(&self.cell, topic, args)
    }

    /// Have this service receive `publisher`'s messages on `topic`.
    ///
    /// Subscribing twice is a no-op.
    pub fn subscribe(&self, publisher: &str, topic: &str) -> BusResult<()> {
        self.ensure_running()?;
        self.registry.subscribe(self.name(), publisher, topic)?;
        Ok(())
    }

    /// Stop receiving `publisher`'s messages on `topic`. No-op if absent.
    pub fn unsubscribe(&self, publisher: &str, topic: &str) -> BusResult<()> {
        self.ensure_running()?;
        self.registry.unsubscribe(self.name(), publisher, topic)?;
        Ok(())
    }

    /// Subscriptions in which this service is the subscriber.
    pub fn subscriptions(&self) -> BusResult<Vec<Subscription>> {
        self.ensure_running()?;
        self.registry.subscriptions_of(self.name())
    }

    /// Register a callback run on this service's worker for every message on
    /// `topic` that reaches its mailbox, including its own publications.
    pub fn add_listener<F>(&self, topic: &str, callback: F) -> BusResult<ListenerId>
    where
        F: Fn(&ServiceHandle, &Message) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.ensure_running()?;
        validate_topic(topic)?;
        let id = self.cell.listeners.add(topic, Arc::new(callback))?;
        debug!(service = %self.name(), topic, listener = id.get(), "listener added");
        Ok(id)
    }

    /// Returns `false` if no listener had that id.
    pub fn remove_listener(&self, id: ListenerId) -> BusResult<bool> {
        self.cell.listeners.remove(id)
    }

    /// Topics with at least one listener, sorted.
    pub fn listener_topics(&self) -> Vec<String> {
        self.cell.listeners.topics()
    }

    // ========================================================================
    // Blocking waits
    // ========================================================================

    /// Block until this service publishes on `topic`, or `timeout` elapses.
    pub fn wait_for(&self, topic: &str, timeout: Duration) -> BusResult<WaitOutcome> {
        self.wait_for_with(topic, WaitOptions::timeout(timeout))
    }

    pub fn wait_for_with(&self, topic: &str, options: WaitOptions) -> BusResult<WaitOutcome> {
        Ok(self.prepare_wait(topic, options)?.wait())
    }

    /// Register a wait without blocking yet.
    ///
    /// Messages published after this returns are seen by the wait, so a
    /// caller can trigger the event it is about to wait for without racing it.
    pub fn prepare_wait(&self, topic: &str, options: WaitOptions) -> BusResult<PendingWait> {
        validate_topic(topic)?;
        Ok(self.cell.gate.register(topic, options))
    }

    /// Cancel every pending wait on `topic`. Returns how many were canceled.
    pub fn cancel_waits(&self, topic: &str) -> usize {
        self.cell.gate.cancel_topic(topic)
    }

    pub fn pending_waits(&self) -> usize {
        self.cell.gate.pending()
    }

    // ========================================================================
    // Introspection and lifecycle
    // ========================================================================

    pub fn stats(&self) -> ServiceStats {
        self.cell.stats.snapshot()
    }

    /// Most recent contained callback failures, oldest first.
    pub fn faults(&self) -> Vec<ListenerFault> {
        self.cell.faults.snapshot()
    }

    /// Messages waiting in the mailbox.
    pub fn queued(&self) -> usize {
        self.cell.mailbox.len()
    }

    /// Stop this service.
    ///
    /// Unlike `Registry::stop`, this never touches a newer service started
    /// under the same name: once this one has stopped the call fails with
    /// [`BusError::ServiceStopped`]. Called from a worker thread (a listener
    /// stopping its own or another service) it returns without waiting for
    /// the stopped worker to drain.
    pub fn stop(&self) -> BusResult<ServiceStats> {
        self.registry.stop_service(&self.cell)
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.cell.name)
            .field("kind", &self.cell.kind.name())
            .field("running", &self.cell.is_running())
            .finish()
    }
}
