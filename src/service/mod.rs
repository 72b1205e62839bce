//! Services - named, independently running units of the runtime.
//!
//! A service is started from a [`ServiceKind`] by the
//! [`Registry`](crate::Registry) and is driven by one worker thread that
//! drains its mailbox. Callers talk to it through a [`ServiceHandle`].
//!
//! ## Quick Start
//!
//! ```
//! use std::time::Duration;
//! use serde_json::json;
//! use service_bus::{Arity, Registry, ServiceKind};
//!
//! let registry = Registry::new();
//! registry.kind(ServiceKind::new("Keyboard").publishes("keyPressed", Arity::Exact(1)));
//! registry.kind(ServiceKind::new("Python"));
//!
//! let kbd = registry.start("kbd", "Keyboard").unwrap();
//! let py = registry.start("py", "Python").unwrap();
//! py.subscribe("kbd", "keyPressed").unwrap();
//!
//! let wait = kbd.prepare_wait("keyPressed", Duration::from_secs(1).into()).unwrap();
//! kbd.publish("keyPressed", vec![json!("a")]).unwrap();
//! assert_eq!(wait.wait().message().unwrap().args[0], json!("a"));
//! ```

mod cell;
mod handle;
mod kind;
mod worker;

pub(crate) use cell::ServiceCell;
pub use handle::ServiceHandle;
pub use kind::{Arity, ServiceKind};
pub(crate) use worker::{on_worker_thread, spawn as spawn_worker};
pub use worker::{ListenerFault, ServiceStats};
