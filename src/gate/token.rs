//! Blocking Wait Token: the state of one synchronous wait.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::bus::Message;

/// How a message is shared among waiters on the same topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Every pending waiter receives the next matching message.
    #[default]
    Broadcast,
    /// Exactly one pending waiter (the oldest) receives each matching message;
    /// the others keep waiting.
    SingleConsumer,
}

/// Terminal result of a wait.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// A matching message was published.
    Received(Arc<Message>),
    /// The timeout elapsed first.
    TimedOut,
    /// The wait was canceled, e.g. because the service stopped.
    Canceled,
}

impl WaitOutcome {
    pub fn message(&self) -> Option<&Message> {
        match self {
            WaitOutcome::Received(message) => Some(message),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<Arc<Message>> {
        match self {
            WaitOutcome::Received(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_received(&self) -> bool {
        matches!(self, WaitOutcome::Received(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, WaitOutcome::Canceled)
    }
}

#[derive(Debug, Clone)]
enum TokenState {
    Pending,
    Satisfied(Arc<Message>),
    TimedOut,
    Canceled,
}

/// `Pending → {Satisfied, TimedOut, Canceled}`, exactly once.
#[derive(Debug)]
pub(crate) struct WaitToken {
    topic: String,
    mode: DeliveryMode,
    state: Mutex<TokenState>,
    wake: Condvar,
}

impl WaitToken {
    pub(crate) fn new(topic: impl Into<String>, mode: DeliveryMode) -> Self {
        Self {
            topic: topic.into(),
            mode,
            state: Mutex::new(TokenState::Pending),
            wake: Condvar::new(),
        }
    }

    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn mode(&self) -> DeliveryMode {
        self.mode
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: TokenState) -> bool {
        let mut state = self.lock();
        if !matches!(*state, TokenState::Pending) {
            return false;
        }
        *state = next;
        self.wake.notify_all();
        true
    }

    /// Hand over a message. `false` if the token already reached a terminal state.
    pub(crate) fn satisfy(&self, message: Arc<Message>) -> bool {
        self.transition(TokenState::Satisfied(message))
    }

    pub(crate) fn cancel(&self) -> bool {
        self.transition(TokenState::Canceled)
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(*self.lock(), TokenState::Pending)
    }

    /// Suspend until the token leaves `Pending`. With a deadline, the token
    /// times out once the deadline has passed and not before.
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> WaitOutcome {
        let mut state = self.lock();
        loop {
            match &*state {
                TokenState::Satisfied(message) => return WaitOutcome::Received(Arc::clone(message)),
                TokenState::TimedOut => return WaitOutcome::TimedOut,
                TokenState::Canceled => return WaitOutcome::Canceled,
                TokenState::Pending => {}
            }

            state = match deadline {
                None => self.wake.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        *state = TokenState::TimedOut;
                        continue;
                    }
                    self.wake
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}
