//! Service Bus - in-process message routing between services
//!
//! ## Architecture
//!
//! ```text
//!  ServiceHandle::publish(topic, args)
//!            │
//!            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                          │
//! │  - validates topic and argument contract                    │
//! │  - numbers the message (per-publisher sequence)             │
//! │  - snapshots SubscriptionTable[(publisher, topic)]          │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌────────────────┐   ┌────────────────┐   ┌─────────────────────┐
//! │ subscriber     │   │ own mailbox    │   │ publisher's gate    │
//! │ mailboxes      │   │ (if listening) │   │ (blocking waiters)  │
//! └────────────────┘   └────────────────┘   └─────────────────────┘
//!          │                    │
//!          ▼                    ▼
//!     worker thread: kind method, then listeners, in FIFO order
//! ```
//!
//! Publishing never waits for a subscriber to process a message. A full
//! mailbox is handled by its [`OverflowPolicy`](crate::OverflowPolicy).

mod dispatcher;
mod listener;
mod mailbox;
mod message;
mod subscription;

pub(crate) use dispatcher::{Directory, Dispatcher};
pub(crate) use listener::ListenerSet;
pub use listener::{Callback, ListenerId};
pub use mailbox::{Delivery, Mailbox};
pub use message::Message;
pub use subscription::{Subscription, SubscriptionTable};
