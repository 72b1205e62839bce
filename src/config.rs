//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object (or no environment
//! variables at all) yields a working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BusError, BusResult};

const ENV_PREFIX: &str = "SERVICE_BUS_";

/// What a mailbox does when a message arrives and it is already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room.
    #[default]
    DropOldest,
    /// Discard the incoming message.
    DropNewest,
    /// Wait up to `timeout_ms` for the worker to make room, then evict the
    /// oldest message. Holds up the publishing call for at most that long.
    Block { timeout_ms: u64 },
}

impl OverflowPolicy {
    /// Parse the textual form used in environment variables:
    /// `drop_oldest`, `drop_newest` or `block:<millis>`.
    pub fn parse(raw: &str) -> BusResult<Self> {
        match raw.trim() {
            "drop_oldest" => Ok(Self::DropOldest),
            "drop_newest" => Ok(Self::DropNewest),
            other => match other.strip_prefix("block:") {
                Some(ms) => ms
                    .parse::<u64>()
                    .map(|timeout_ms| Self::Block { timeout_ms })
                    .map_err(|e| BusError::Config(format!("overflow block timeout {:?}: {}", ms, e))),
                None => Err(BusError::Config(format!("unknown overflow policy {:?}", other))),
            },
        }
    }

    pub(crate) fn block_timeout(&self) -> Option<Duration> {
        match self {
            Self::Block { timeout_ms } => Some(Duration::from_millis(*timeout_ms)),
            _ => None,
        }
    }
}

/// Registry-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default mailbox capacity for new services.
    pub mailbox_capacity: usize,
    /// Default overflow policy for new services.
    pub overflow: OverflowPolicy,
    /// Bring up the built-in runtime service that publishes `registered` and
    /// `released` events.
    pub lifecycle_events: bool,
    /// Name of the built-in runtime service.
    pub runtime_name: String,
    /// How many recent listener faults each service remembers.
    pub fault_history: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
            overflow: OverflowPolicy::DropOldest,
            lifecycle_events: true,
            runtime_name: "runtime".to_string(),
            fault_history: 32,
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON document. Missing fields fall back to defaults.
    pub fn from_json(raw: &str) -> BusResult<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| BusError::Config(e.to_string()))?;
        config.validate()
    }

    /// Read `SERVICE_BUS_*` environment variables on top of the defaults.
    pub fn from_env() -> BusResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> BusResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(raw) = var("MAILBOX_CAPACITY") {
            config.mailbox_capacity = raw
                .trim()
                .parse()
                .map_err(|e| BusError::Config(format!("MAILBOX_CAPACITY {:?}: {}", raw, e)))?;
        }
        if let Some(raw) = var("OVERFLOW") {
            config.overflow = OverflowPolicy::parse(&raw)?;
        }
        if let Some(raw) = var("LIFECYCLE_EVENTS") {
            config.lifecycle_events = parse_bool(&raw)?;
        }
        if let Some(raw) = var("RUNTIME_NAME") {
            config.runtime_name = raw.trim().to_string();
        }
        if let Some(raw) = var("FAULT_HISTORY") {
            config.fault_history = raw
                .trim()
                .parse()
                .map_err(|e| BusError::Config(format!("FAULT_HISTORY {:?}: {}", raw, e)))?;
        }

        config.validate()
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_lifecycle_events(mut self, enabled: bool) -> Self {
        self.lifecycle_events = enabled;
        self
    }

    pub(crate) fn validate(self) -> BusResult<Self> {
        if self.mailbox_capacity == 0 {
            return Err(BusError::Config("mailbox_capacity must be at least 1".into()));
        }
        if self.lifecycle_events {
            crate::registry::validate_name(&self.runtime_name)
                .map_err(|e| BusError::Config(e.to_string()))?;
        }
        Ok(self)
    }

    pub(crate) fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            mailbox_capacity: Some(self.mailbox_capacity),
            overflow: Some(self.overflow),
        }
    }
}

fn parse_bool(raw: &str) -> BusResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BusError::Config(format!("expected a boolean, got {:?}", other))),
    }
}

/// Per-service overrides passed to `Registry::start_with`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceOptions {
    pub mailbox_capacity: Option<usize>,
    pub overflow: Option<OverflowPolicy>,
}

impl ServiceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = Some(capacity);
        self
    }

    pub fn overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = Some(overflow);
        self
    }

    /// Fill unset fields from `defaults`.
    pub(crate) fn or(self, defaults: ServiceOptions) -> ServiceOptions {
        ServiceOptions {
            mailbox_capacity: self.mailbox_capacity.or(defaults.mailbox_capacity),
            overflow: self.overflow.or(defaults.overflow),
        }
    }
}
