//! Registry - the table of live services.
//!
//! The [`Registry`] creates services from registered kinds, hands out
//! [`ServiceHandle`](crate::ServiceHandle)s, owns the subscription table and
//! tears services down. It is an ordinary value: create as many as needed,
//! nothing is global.
//!
//! ## Lifecycle events
//!
//! With `lifecycle_events` on (the default), the first start brings up a
//! built-in service (named `runtime` unless configured otherwise) of kind
//! [`RUNTIME_KIND`]. It publishes:
//!
//! | topic        | args           |
//! |--------------|----------------|
//! | `registered` | `[name, kind]` |
//! | `released`   | `[name]`       |
//!
//! ```
//! use std::time::Duration;
//! use service_bus::{Registry, ServiceKind};
//!
//! let registry = Registry::new();
//! registry.kind(ServiceKind::new("Keyboard"));
//! registry.start("kbd", "Keyboard").unwrap();
//!
//! let runtime = registry.lookup("runtime").unwrap();
//! let wait = runtime.prepare_wait("released", Duration::from_secs(1).into()).unwrap();
//! registry.stop("kbd").unwrap();
//! assert_eq!(wait.wait().message().unwrap().args[0], "kbd");
//! ```

mod name_lock;
mod naming;
#[allow(clippy::module_inception)]
mod registry;

pub use naming::{validate_name, validate_topic};
pub(crate) use registry::RegistryInner;
pub use registry::{Registry, RUNTIME_KIND};
