//! Shared fixtures: a registry with the test kinds and a callback recorder.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use service_bus::{
    Arity, ListenerError, Message, Registry, RuntimeConfig, ServiceHandle, ServiceKind,
};

/// Upper bound for anything that should happen "soon".
pub const PATIENCE: Duration = Duration::from_secs(5);

/// Keyboard publishes `keyPressed(key)` and `keyMoved(x, ..)`.
pub fn keyboard() -> ServiceKind {
    ServiceKind::new("Keyboard")
        .publishes("keyPressed", Arity::Exact(1))
        .publishes("keyMoved", Arity::AtLeast(1))
}

/// Registry without the lifecycle service, with `Keyboard` and `Sink` kinds.
pub fn registry() -> Registry {
    registry_with(RuntimeConfig::default().with_lifecycle_events(false))
}

pub fn registry_with(config: RuntimeConfig) -> Registry {
    let registry = Registry::with_config(config).unwrap();
    registry.kind(keyboard()).kind(ServiceKind::new("Sink"));
    registry
}

/// Poll `cond` until it holds or [`PATIENCE`] runs out.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + PATIENCE;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Records every message its callbacks see.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Message>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(
        &self,
    ) -> impl Fn(&ServiceHandle, &Message) -> Result<(), ListenerError> + Send + Sync + 'static
    {
        let seen = Arc::clone(&self.seen);
        move |_: &ServiceHandle, msg: &Message| {
            seen.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.seen.lock().unwrap().clone()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.messages().iter().map(|m| m.sequence).collect()
    }

    /// First argument of every recorded message.
    pub fn first_args(&self) -> Vec<Value> {
        self.messages()
            .iter()
            .map(|m| m.args.first().cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn wait_for_len(&self, n: usize) -> bool {
        eventually(|| self.len() >= n)
    }
}
