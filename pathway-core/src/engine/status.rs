//! Engine state, counters and per-event reports.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::model::{Action, EventId, LearnerId};

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Aggregate counters since the engine was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCounters {
    /// Events applied to learner state.
    pub events_processed: u64,
    /// Events dropped as duplicate or out of order.
    pub duplicates: u64,
    /// Stream records rejected at the boundary.
    pub validation_errors: u64,
    /// Events the policy could not evaluate.
    pub policy_errors: u64,
    pub actions_emitted: u64,
    /// Publish attempts beyond the first.
    pub publish_retries: u64,
    pub dead_lettered: u64,
}

/// Read-only engine status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub learners_tracked: usize,
    pub counters: EngineCounters,
}

/// Lock-free counters shared by lanes and intake.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    events_processed: AtomicU64,
    duplicates: AtomicU64,
    validation_errors: AtomicU64,
    policy_errors: AtomicU64,
    actions_emitted: AtomicU64,
    publish_retries: AtomicU64,
    dead_lettered: AtomicU64,
}

impl Metrics {
    pub(crate) fn event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn validation_errors(&self, count: u64) {
        self.validation_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn policy_error(&self) {
        self.policy_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn action_emitted(&self) {
        self.actions_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn publish_retries(&self, count: u64) {
        self.publish_retries.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn counters(&self) -> EngineCounters {
        EngineCounters {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            policy_errors: self.policy_errors.load(Ordering::Relaxed),
            actions_emitted: self.actions_emitted.load(Ordering::Relaxed),
            publish_retries: self.publish_retries.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub event_id: EventId,
    pub learner_id: LearnerId,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// State committed and every action delivered or dead-lettered.
    Processed {
        actions: Vec<Action>,
        /// How many of `actions` ended in the dead-letter sink.
        dead_lettered: usize,
    },
    /// Already applied or out of order; nothing changed.
    Duplicate,
    /// The policy rejected the event; state unchanged, event still acknowledged.
    HandledWithError { reason: String },
}

impl DispatchReport {
    /// Actions emitted for this event, if any.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        match &self.outcome {
            DispatchOutcome::Processed { actions, .. } => actions,
            _ => &[],
        }
    }
}
