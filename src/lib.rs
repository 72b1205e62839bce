pub mod bus;
mod config;
mod error;
mod gate;
pub mod observability;
mod registry;
mod service;

pub use bus::{ListenerId, Message, Subscription};
pub use config::{OverflowPolicy, RuntimeConfig, ServiceOptions};
pub use error::{BusError, BusResult, ListenerError};
pub use gate::{DeliveryMode, PendingWait, WaitCanceller, WaitOptions, WaitOutcome};
pub use registry::{validate_name, validate_topic, Registry, RUNTIME_KIND};
pub use service::{Arity, ListenerFault, ServiceHandle, ServiceKind, ServiceStats};

// Argument lists are `serde_json::Value`s; re-exported so callers can use
// `service_bus::json!` without a direct dependency.
pub use serde_json::{json, Value};
