//! Per-service set of pending waits.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use crate::bus::Message;

use super::token::{DeliveryMode, WaitOutcome, WaitToken};

/// Options for one blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitOptions {
    /// `None` waits until a message arrives or the wait is canceled.
    pub timeout: Option<Duration>,
    pub mode: DeliveryMode,
}

impl WaitOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            mode: DeliveryMode::Broadcast,
        }
    }

    pub fn forever() -> Self {
        Self::default()
    }

    pub fn single_consumer(mut self) -> Self {
        self.mode = DeliveryMode::SingleConsumer;
        self
    }

    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }
}

impl From<Duration> for WaitOptions {
    fn from(timeout: Duration) -> Self {
        Self::timeout(timeout)
    }
}

struct GateState {
    closed: bool,
    waiters: Vec<Arc<WaitToken>>,
}

/// Blocking Gate of one service.
///
/// Waiters register a token; the dispatcher calls [`Gate::notify`] for every
/// message the service publishes.
pub(crate) struct Gate {
    state: Mutex<GateState>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                closed: false,
                waiters: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a wait. On a closed gate the token is canceled right away.
    pub(crate) fn register(self: &Arc<Self>, topic: &str, options: WaitOptions) -> PendingWait {
        let token = Arc::new(WaitToken::new(topic, options.mode));
        let deadline = options
            .timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));

        let mut state = self.lock();
        if state.closed {
            token.cancel();
        } else {
            state.waiters.push(Arc::clone(&token));
        }
        drop(state);

        PendingWait {
            gate: Arc::clone(self),
            token,
            deadline,
        }
    }

    fn remove(&self, token: &Arc<WaitToken>) {
        self.lock().waiters.retain(|t| !Arc::ptr_eq(t, token));
    }

    /// Hand `message` to matching waiters. Returns how many were woken.
    pub(crate) fn notify(&self, message: &Arc<Message>) -> usize {
        let mut state = self.lock();
        if state.waiters.is_empty() {
            return 0;
        }

        let mut woken = 0;
        let mut consumed = false;
        state.waiters.retain(|token| {
            if token.topic() != message.topic {
                return true;
            }
            match token.mode() {
                DeliveryMode::Broadcast => {
                    if token.satisfy(Arc::clone(message)) {
                        woken += 1;
                    }
                    false
                }
                DeliveryMode::SingleConsumer if consumed => true,
                DeliveryMode::SingleConsumer => {
                    if token.satisfy(Arc::clone(message)) {
                        woken += 1;
                        consumed = true;
                    }
                    false
                }
            }
        });
        woken
    }

    /// Cancel every pending wait on `topic`.
    pub(crate) fn cancel_topic(&self, topic: &str) -> usize {
        let mut state = self.lock();
        let mut canceled = 0;
        state.waiters.retain(|token| {
            if token.topic() != topic {
                return true;
            }
            if token.cancel() {
                canceled += 1;
            }
            false
        });
        canceled
    }

    /// Cancel every pending wait and refuse new ones.
    pub(crate) fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        state
            .waiters
            .drain(..)
            .filter(|token| token.cancel())
            .count()
    }

    pub(crate) fn pending(&self) -> usize {
        self.lock()
            .waiters
            .iter()
            .filter(|token| token.is_pending())
            .count()
    }
}

/// A registered but not yet awaited wait.
///
/// Registering before waiting lets a caller hand out a [`WaitCanceller`] or
/// trigger the event it is about to wait for without racing the publish.
/// Dropping an unawaited `PendingWait` cancels it.
pub struct PendingWait {
    gate: Arc<Gate>,
    token: Arc<WaitToken>,
    deadline: Option<Instant>,
}

impl PendingWait {
    /// Suspend the calling thread until the wait completes.
    pub fn wait(self) -> WaitOutcome {
        self.token.wait(self.deadline)
    }

    /// A handle that can cancel this wait from another thread.
    pub fn canceller(&self) -> WaitCanceller {
        WaitCanceller {
            token: Arc::downgrade(&self.token),
        }
    }

    pub fn topic(&self) -> &str {
        self.token.topic()
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        self.token.cancel();
        self.gate.remove(&self.token);
    }
}

impl std::fmt::Debug for PendingWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWait")
            .field("topic", &self.token.topic())
            .field("mode", &self.token.mode())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Cancels one pending wait.
#[derive(Debug, Clone)]
pub struct WaitCanceller {
    token: Weak<WaitToken>,
}

impl WaitCanceller {
    /// Returns `true` if this call moved the wait to `Canceled`.
    pub fn cancel(&self) -> bool {
        self.token.upgrade().map(|token| token.cancel()).unwrap_or(false)
    }
}
