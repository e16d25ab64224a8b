//! Error types for pathway-core

use thiserror::Error;

use crate::engine::EngineState;

/// An event that failed validation at the boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The learner id was empty or whitespace.
    #[error("learner_id must not be empty")]
    EmptyLearnerId,

    /// The producer sequence was zero or negative.
    #[error("sequence must be positive, got {0}")]
    NonPositiveSequence(i64),

    /// The event type is not one the engine understands.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The payload did not match its event type.
    #[error("malformed {event_type} payload: {reason}")]
    MalformedPayload { event_type: String, reason: String },

    /// The record could not be decoded at all.
    #[error("malformed event: {0}")]
    Malformed(String),
}

/// A payload that is well-formed but semantically invalid for evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("invalid {event_type} payload: {field} {reason}")]
    InvalidPayload {
        event_type: &'static str,
        field: &'static str,
        reason: String,
    },
}

/// Failure reported by an action publisher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// Transient failure; the delivery may be retried.
    #[error("retryable publish failure: {0}")]
    Retryable(String),

    /// The action will never be accepted.
    #[error("permanent publish failure: {0}")]
    Permanent(String),
}

impl PublishError {
    /// Whether a retry could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle misuse of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// `dispatch` was called before `initialize` completed.
    #[error("engine not ready (state: {state})")]
    NotReady { state: EngineState },

    /// The engine is draining or stopped.
    #[error("engine stopped")]
    Stopped,

    /// A lane task is gone and can no longer accept work.
    #[error("lane {lane} is unavailable")]
    LaneUnavailable { lane: usize },
}

/// Top-level error type for pathway-core
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Event stream failure
    #[error("stream error: {0}")]
    Stream(#[from] pathway_stream::Error),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot written by an incompatible version
    #[error("unsupported snapshot version {0}")]
    UnsupportedSnapshot(u32),
}

/// Result type alias for pathway-core operations
pub type Result<T> = std::result::Result<T, Error>;
