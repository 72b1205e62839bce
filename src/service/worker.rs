//! The per-service worker thread.
//!
//! Each service has exactly one worker draining its mailbox in FIFO order, so
//! a service's callbacks never run concurrently with each other. Callback
//! failures (errors and panics) are contained here: they are logged, counted
//! and remembered as [`ListenerFault`]s, and the loop carries on.

use std::any::Any;
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::bus::{Callback, Message};
use crate::error::{BusError, BusResult};

use super::ServiceHandle;

/// Counters for one service.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    /// Messages for which at least one method or listener ran.
    pub handled: u64,
    /// Callback invocations that failed or panicked.
    pub faults: u64,
    /// Messages that reached the worker with nothing bound to their topic.
    pub unhandled: u64,
    /// Messages lost to mailbox overflow.
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    handled: AtomicU64,
    faults: AtomicU64,
    unhandled: AtomicU64,
    dropped: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ServiceStats {
        ServiceStats {
            handled: self.handled.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A contained callback failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerFault {
    /// Service whose worker ran the callback.
    pub service: String,
    /// Publisher of the message being handled.
    pub source: String,
    pub topic: String,
    pub sequence: u64,
    /// `"method"` or `"listener#<id>"`.
    pub callback: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Bounded ring of the most recent faults.
#[derive(Debug)]
pub(crate) struct FaultLog {
    limit: usize,
    recent: Mutex<VecDeque<ListenerFault>>,
}

impl FaultLog {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            recent: Mutex::new(VecDeque::with_capacity(limit.min(64))),
        }
    }

    fn push(&self, fault: ListenerFault) {
        if self.limit == 0 {
            return;
        }
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.len() == self.limit {
            recent.pop_front();
        }
        recent.push_back(fault);
    }

    pub(crate) fn snapshot(&self) -> Vec<ListenerFault> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is some service's worker.
pub(crate) fn on_worker_thread() -> bool {
    ON_WORKER.with(Cell::get)
}

/// Spawn the worker for `handle`'s service.
pub(crate) fn spawn(handle: ServiceHandle) -> BusResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("svc-{}", handle.name()))
        .spawn(move || run(handle))
        .map_err(|e| BusError::Spawn(e.to_string()))
}

fn run(handle: ServiceHandle) {
    ON_WORKER.with(|flag| flag.set(true));
    debug!(service = %handle.name(), "worker started");
    while let Some(message) = handle.cell().mailbox.recv() {
        process(&handle, &message);
    }
    debug!(service = %handle.name(), "worker stopped");
}

/// Run everything bound to `message.topic`: the kind's method first, then
/// listeners in registration order.
fn process(handle: &ServiceHandle, message: &Message) {
    let cell = handle.cell();
    let mut invoked = 0usize;

    if let Some(method) = cell.kind.method_for(&message.topic) {
        invoked += 1;
        if method.arity.accepts(message.arity()) {
            invoke(handle, message, &method.callback, "method");
        } else {
            let err = BusError::ArityMismatch {
                topic: message.topic.clone(),
                expected: method.arity,
                found: crate::Arity::Exact(message.arity()),
            };
            record_fault(handle, message, "method", err.to_string());
        }
    }

    for (id, callback) in cell.listeners.for_topic(&message.topic) {
        invoked += 1;
        invoke(handle, message, &callback, &format!("listener#{}", id.get()));
    }

    if invoked == 0 {
        cell.stats.unhandled.fetch_add(1, Ordering::Relaxed);
        trace!(
            service = %handle.name(),
            source = %message.source,
            topic = %message.topic,
            "no method or listener bound"
        );
    } else {
        cell.stats.handled.fetch_add(1, Ordering::Relaxed);
    }
}

fn invoke(handle: &ServiceHandle, message: &Message, callback: &Callback, label: &str) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| callback(handle, message)));
    let error = match result {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.to_string(),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };
    record_fault(handle, message, label, error);
}

fn record_fault(handle: &ServiceHandle, message: &Message, label: &str, error: String) {
    let cell = handle.cell();
    cell.stats.faults.fetch_add(1, Ordering::Relaxed);
    warn!(
        service = %handle.name(),
        source = %message.source,
        topic = %message.topic,
        sequence = message.sequence,
        callback = label,
        error = %error,
        "listener fault"
    );
    cell.faults.push(ListenerFault {
        service: handle.name().to_string(),
        source: message.source.clone(),
        topic: message.topic.clone(),
        sequence: message.sequence,
        callback: label.to_string(),
        error,
        at: Utc::now(),
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
