//! Service kinds - named templates a service is started from.
//!
//! A kind declares the topics its services publish (with an argument
//! contract), the methods its services run for inbound messages, and
//! optional start/stop hooks.
//!
//! ## Example
//!
//! ```
//! use service_bus::{Arity, ServiceKind};
//!
//! let keyboard = ServiceKind::new("Keyboard")
//!     .publishes("keyPressed", Arity::Exact(1))
//!     .publishes("mouseMoved", Arity::Exact(2))
//!     .strict();
//!
//! let python = ServiceKind::new("Python")
//!     .method("keyPressed", Arity::Exact(1), |_svc, msg| {
//!         println!("you pressed {}", msg.args[0]);
//!         Ok(())
//!     });
//!
//! assert!(keyboard.declares("keyPressed"));
//! assert!(python.has_method("keyPressed"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bus::{Callback, Message};
use crate::error::{BusError, BusResult, ListenerError};

use super::ServiceHandle;

/// Argument-count contract for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Arity {
    #[default]
    Any,
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    /// Does an argument list of length `count` satisfy this contract?
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Any => true,
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }

    /// Is there at least one argument count both contracts accept?
    pub fn compatible(&self, other: &Arity) -> bool {
        match (*self, *other) {
            (Arity::Any, _) | (_, Arity::Any) => true,
            (Arity::Exact(a), Arity::Exact(b)) => a == b,
            (Arity::Exact(a), Arity::AtLeast(b)) | (Arity::AtLeast(b), Arity::Exact(a)) => a >= b,
            (Arity::AtLeast(_), Arity::AtLeast(_)) => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Any => write!(f, "any number"),
            Arity::Exact(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

/// A kind method: runs on the service's worker for inbound messages on its topic.
#[derive(Clone)]
pub(crate) struct Method {
    pub(crate) arity: Arity,
    pub(crate) callback: Callback,
}

type Hook = Arc<dyn Fn(&ServiceHandle) -> Result<(), ListenerError> + Send + Sync>;

/// Template for services: topic contracts, methods and lifecycle hooks.
///
/// Built with chained calls and registered on a
/// [`Registry`](crate::Registry) with [`Registry::kind`](crate::Registry::kind).
#[derive(Clone)]
pub struct ServiceKind {
    name: String,
    contracts: BTreeMap<String, Arity>,
    strict: bool,
    methods: HashMap<String, Method>,
    on_start: Option<Hook>,
    on_stop: Option<Hook>,
}

impl ServiceKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contracts: BTreeMap::new(),
            strict: false,
            methods: HashMap::new(),
            on_start: None,
            on_stop: None,
        }
    }

    /// Declare a topic this kind publishes and its argument contract.
    pub fn publishes(mut self, topic: &str, arity: Arity) -> Self {
        self.contracts.insert(topic.to_string(), arity);
        self
    }

    /// Reject publishing, and subscribing to this kind, on undeclared topics.
    ///
    /// Listeners are unaffected: they also handle topics received from the
    /// services this one subscribes to.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Register the method run for inbound messages on `topic`.
    ///
    /// Messages whose argument count violates `arity` are not passed to the
    /// method; they are recorded as listener faults.
    pub fn method<F>(mut self, topic: &str, arity: Arity, handler: F) -> Self
    where
        F: Fn(&ServiceHandle, &Message) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.methods.insert(
            topic.to_string(),
            Method {
                arity,
                callback: Arc::new(handler),
            },
        );
        self
    }

    /// Run when a service of this kind starts. A failure aborts the start.
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ServiceHandle) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(hook));
        self
    }

    /// Run when a service of this kind is stopped, before it is torn down.
    pub fn on_stop<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ServiceHandle) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on_stop = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Declared topics and their contracts, sorted by topic.
    pub fn contracts(&self) -> impl Iterator<Item = (&str, Arity)> {
        self.contracts.iter().map(|(topic, arity)| (topic.as_str(), *arity))
    }

    pub fn contract(&self, topic: &str) -> Option<Arity> {
        self.contracts.get(topic).copied()
    }

    pub fn declares(&self, topic: &str) -> bool {
        self.contracts.contains_key(topic)
    }

    pub fn has_method(&self, topic: &str) -> bool {
        self.methods.contains_key(topic)
    }

    /// Method topics, sorted.
    pub fn method_topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    pub(crate) fn method_for(&self, topic: &str) -> Option<&Method> {
        self.methods.get(topic)
    }

    pub(crate) fn method_arity(&self, topic: &str) -> Option<Arity> {
        self.methods.get(topic).map(|method| method.arity)
    }

    pub(crate) fn start_hook(&self) -> Option<Hook> {
        self.on_start.clone()
    }

    pub(crate) fn stop_hook(&self) -> Option<Hook> {
        self.on_stop.clone()
    }

    /// A strict kind only accepts declared topics.
    pub(crate) fn check_topic(&self, topic: &str) -> BusResult<()> {
        if self.strict && !self.contracts.contains_key(topic) {
            return Err(BusError::invalid_topic(
                topic,
                format!("not declared by strict kind {}", self.name),
            ));
        }
        Ok(())
    }

    /// Validate an outgoing argument list against the declared contract.
    pub(crate) fn check_publish(&self, topic: &str, count: usize) -> BusResult<()> {
        self.check_topic(topic)?;
        match self.contracts.get(topic) {
            Some(arity) if !arity.accepts(count) => Err(BusError::ArityMismatch {
                topic: topic.to_string(),
                expected: *arity,
                found: Arity::Exact(count),
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceKind")
            .field("name", &self.name)
            .field("contracts", &self.contracts)
            .field("strict", &self.strict)
            .field("methods", &self.method_topics())
            .finish()
    }
}
