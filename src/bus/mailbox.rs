//! Per-service bounded inbound queue.
//!
//! Any thread may push; only the owning service's worker pops. A full
//! mailbox never stalls the publisher indefinitely: the configured
//! [`OverflowPolicy`] decides which message gives way.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::OverflowPolicy;

use super::Message;

/// Result of pushing into a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued without displacing anything.
    Enqueued,
    /// Queued after evicting the oldest message.
    DisplacedOldest,
    /// The incoming message was discarded because the mailbox was full.
    DiscardedNewest,
    /// The mailbox is closed; nothing was queued.
    Closed,
}

impl Delivery {
    /// True if the pushed message ended up in the queue.
    pub fn accepted(&self) -> bool {
        matches!(self, Delivery::Enqueued | Delivery::DisplacedOldest)
    }

    /// True if some message was lost to make this push happen (or instead of it).
    pub fn dropped(&self) -> bool {
        matches!(self, Delivery::DisplacedOldest | Delivery::DiscardedNewest)
    }
}

struct MailboxState {
    queue: VecDeque<Arc<Message>>,
    closed: bool,
}

/// Bounded FIFO of messages waiting for a service's worker.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use serde_json::json;
/// use service_bus::bus::{Mailbox, Message};
/// use service_bus::OverflowPolicy;
///
/// let mailbox = Mailbox::new(2, OverflowPolicy::DropOldest);
/// for seq in 1..=3 {
///     mailbox.push(Arc::new(Message::new("kbd", "keyPressed", vec![json!(seq)], seq)));
/// }
///
/// // The oldest message gave way.
/// assert_eq!(mailbox.recv_timeout(Duration::from_millis(10)).unwrap().sequence, 2);
/// assert_eq!(mailbox.recv_timeout(Duration::from_millis(10)).unwrap().sequence, 3);
/// ```
pub struct Mailbox {
    capacity: usize,
    policy: OverflowPolicy,
    state: Mutex<MailboxState>,
    available: Condvar,
    space: Condvar,
}

impl Mailbox {
    /// Create a mailbox holding at most `capacity` messages (minimum 1).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            state: Mutex::new(MailboxState {
                queue: VecDeque::with_capacity(capacity.clamp(1, 64)),
                closed: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    // Nothing runs user code while holding this lock, so a poisoned guard
    // still protects a consistent queue.
    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a message, applying the overflow policy when full.
    pub fn push(&self, message: Arc<Message>) -> Delivery {
        let mut state = self.lock();
        if state.closed {
            return Delivery::Closed;
        }

        if state.queue.len() >= self.capacity {
            if let Some(timeout) = self.policy.block_timeout() {
                let deadline = Instant::now() + timeout;
                while state.queue.len() >= self.capacity && !state.closed {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    state = self
                        .space
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                if state.closed {
                    return Delivery::Closed;
                }
            }
        }

        let delivery = if state.queue.len() < self.capacity {
            Delivery::Enqueued
        } else {
            match self.policy {
                OverflowPolicy::DropNewest => return Delivery::DiscardedNewest,
                OverflowPolicy::DropOldest | OverflowPolicy::Block { .. } => {
                    state.queue.pop_front();
                    Delivery::DisplacedOldest
                }
            }
        };

        state.queue.push_back(message);
        self.available.notify_one();
        delivery
    }

    /// Block until a message is available. Returns `None` once the mailbox is
    /// closed and fully drained.
    pub fn recv(&self) -> Option<Arc<Message>> {
        let mut state = self.lock();
        loop {
            if let Some(message) = state.queue.pop_front() {
                self.space.notify_one();
                return Some(message);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wait up to `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<Message>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(message) = state.queue.pop_front() {
                self.space.notify_one();
                return Some(message);
            }
            let now = Instant::now();
            if state.closed || now >= deadline {
                return None;
            }
            state = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Take the next message without waiting.
    pub fn try_recv(&self) -> Option<Arc<Message>> {
        let mut state = self.lock();
        let message = state.queue.pop_front();
        if message.is_some() {
            self.space.notify_one();
        }
        message
    }

    /// Refuse further pushes. Already queued messages can still be received.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.available.notify_all();
        self.space.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Mailbox")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}
