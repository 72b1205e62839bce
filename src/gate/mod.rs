//! Blocking Gate - synchronous "wait for the next event" on top of the bus.
//!
//! Each service owns a gate. A caller registers a wait token for a topic and
//! suspends on a condition variable; the dispatcher hands every message the
//! service publishes to matching tokens. Each token ends in exactly one of
//! `Received`, `TimedOut` or `Canceled`.
//!
//! ```text
//!   caller thread                 dispatcher (publish)
//!   ─────────────                 ────────────────────
//!   register(topic) ──► Gate ◄─── notify(message)
//!   wait() ...blocks...   │
//!        ◄────────────────┘ Received(message) | TimedOut | Canceled
//! ```

#[allow(clippy::module_inception)]
mod gate;
mod token;

pub(crate) use gate::Gate;
pub use gate::{PendingWait, WaitCanceller, WaitOptions};
pub use token::{DeliveryMode, WaitOutcome};
