//! pathway-core - Learner orchestration engine
//!
//! This crate ingests typed learner events (baseline results, speech/language
//! plan updates, socio-emotional alerts, coursework analysis), keeps
//! per-learner decision state, and emits typed actions (difficulty level
//! suggestions, game breaks) for downstream services.
//!
//! # Key Types
//!
//! - [`Event`] / [`Action`] - Validated inbound and outbound records
//! - [`LearnerStateStore`] - Sharded per-learner state
//! - [`DecisionPolicy`] - Pure `(state, event, now) -> decision` mapping
//! - [`OrchestrationEngine`] - Lifecycle, lanes, intake and delivery
//! - [`StreamConsumer`] - Adapts a `pathway-stream` subscription to the engine

pub mod clock;
pub mod config;
pub mod consumer;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod model;
pub mod policy;
pub mod state;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, OrchestratorConfig, PolicyConfig, StateConfig};
pub use consumer::{Consumer, ConsumerBatch, StreamConsumer};
pub use delivery::{
    ActionPublisher, ActionRouter, DeadLetter, DeadLetterSink, DeliveryOutcome, InMemoryDeadLetter,
    InMemoryPublisher, RetryPolicy,
};
pub use engine::{
    DispatchOutcome, DispatchReport, EngineBuilder, EngineCounters, EngineState, EngineStatus,
    OrchestrationEngine,
};
pub use error::{
    ConfigError, EngineError, Error, PolicyError, PublishError, Result, ValidationError,
};
pub use model::{
    Action, ActionId, ActionPayload, ActionType, AlertSeverity, BaselineComplete,
    CourseworkAnalyzed, DifficultyLevel, Event, EventId, EventPayload, EventType, GameBreak,
    LearnerId, LevelSuggestion, SelAlert, SlpUpdated, SuggestionReason,
};
pub use policy::{Decision, DecisionOutcome, DecisionPolicy};
pub use state::{LearnerState, LearnerStateStore, StateSnapshot};

// Stream types callers need to wire a consumer.
pub use pathway_stream::{ConsumerConfig, SeekPosition};
