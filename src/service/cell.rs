//! Internal state of one live service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::bus::{Delivery, ListenerSet, Mailbox, Message};
use crate::config::{OverflowPolicy, ServiceOptions};
use crate::gate::Gate;

use super::kind::ServiceKind;
use super::worker::{FaultLog, StatsCounters};

pub(crate) struct ServiceCell {
    pub(crate) name: String,
    pub(crate) kind: Arc<ServiceKind>,
    pub(crate) mailbox: Mailbox,
    pub(crate) gate: Arc<Gate>,
    pub(crate) listeners: ListenerSet,
    /// Last assigned sequence number; held for the whole dispatch so that
    /// numbering and enqueueing happen in the same order.
    pub(crate) sequence: Mutex<u64>,
    pub(crate) stats: StatsCounters,
    pub(crate) faults: FaultLog,
    pub(crate) started_at: DateTime<Utc>,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceCell {
    pub(crate) fn new(
        name: &str,
        kind: Arc<ServiceKind>,
        options: ServiceOptions,
        fault_history: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            mailbox: Mailbox::new(
                options.mailbox_capacity.unwrap_or(1024),
                options.overflow.unwrap_or(OverflowPolicy::DropOldest),
            ),
            gate: Arc::new(Gate::new()),
            listeners: ListenerSet::new(),
            sequence: Mutex::new(0),
            stats: StatsCounters::default(),
            faults: FaultLog::new(fault_history),
            started_at: Utc::now(),
            running: AtomicBool::new(true),
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Push a message into this service's mailbox, counting overflow drops.
    pub(crate) fn deliver(&self, message: Arc<Message>) -> Delivery {
        let delivery = self.mailbox.push(message);
        if delivery.dropped() {
            self.stats.record_dropped();
            debug!(service = %self.name, ?delivery, "mailbox overflow");
        }
        delivery
    }

    pub(crate) fn set_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Take the worker's join handle; `None` once someone else has it.
    pub(crate) fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
