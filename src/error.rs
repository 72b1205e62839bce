//! Error types for the service runtime.
//!
//! `BusError` covers everything a caller of the registry or a service handle
//! can get back synchronously. `ListenerError` is what listener callbacks and
//! kind methods return; those failures never reach the publisher and are
//! recorded as [`ListenerFault`](crate::ListenerFault)s instead.

use thiserror::Error;

use crate::service::Arity;

/// Result type used across the runtime.
pub type BusResult<T> = Result<T, BusError>;

/// Error returned by registry, publish, subscribe and wait operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// `start` was asked for a kind that was never registered.
    #[error("unknown service kind: {0}")]
    UnknownServiceKind(String),

    /// No live service with this name.
    #[error("service not found: {0}")]
    NotFound(String),

    /// The service name is malformed or reserved.
    #[error("invalid service name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The topic name is malformed or not declared by a strict kind.
    #[error("invalid topic {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: String },

    /// Argument count does not satisfy the declared contract for a topic.
    #[error("arity mismatch on topic {topic:?}: expected {expected}, found {found}")]
    ArityMismatch {
        topic: String,
        expected: Arity,
        found: Arity,
    },

    /// The service was stopped while the operation was in progress.
    #[error("service stopped: {0}")]
    ServiceStopped(String),

    /// The `on_start` hook of a kind failed; the service was torn down again.
    #[error("service {name} failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    /// An internal lock was poisoned by a panicking thread.
    #[error("lock poisoned during {0}")]
    LockPoisoned(&'static str),

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A message or argument could not be deserialized.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl BusError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_topic(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Decode(err.to_string())
    }
}

impl From<bitcode::Error> for BusError {
    fn from(err: bitcode::Error) -> Self {
        BusError::Decode(err.to_string())
    }
}

/// Error returned from listener callbacks and kind methods.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Business logic refused the message.
    #[error("rejected: {0}")]
    Rejected(String),

    /// An argument could not be decoded into the expected type.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// A bus operation made from inside the callback failed.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Anything else.
    #[error("listener error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ListenerError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }
}

impl From<serde_json::Error> for ListenerError {
    fn from(err: serde_json::Error) -> Self {
        ListenerError::DecodeFailed(err.to_string())
    }
}
