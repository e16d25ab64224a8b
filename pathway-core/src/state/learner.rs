//! Per-learner decision state.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    Action, ActionId, DifficultyLevel, Event, EventId, EventPayload, EventType, LearnerId,
};

/// Compact trace of an applied event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: EventId,
    pub event_type: EventType,
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
    /// Coursework score, for COURSEWORK_ANALYZED records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        let score = match event.payload() {
            EventPayload::CourseworkAnalyzed(c) => Some(c.score),
            _ => None,
        };
        Self {
            event_id: event.event_id(),
            event_type: event.event_type(),
            sequence: event.sequence(),
            occurred_at: event.occurred_at(),
            score,
        }
    }
}

/// Ring of the most recent event records; the oldest is dropped first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RecentEventsRepr")]
pub struct RecentEvents {
    capacity: usize,
    records: VecDeque<EventRecord>,
}

#[derive(Deserialize)]
struct RecentEventsRepr {
    capacity: usize,
    records: VecDeque<EventRecord>,
}

impl From<RecentEventsRepr> for RecentEvents {
    fn from(repr: RecentEventsRepr) -> Self {
        let mut recent = Self::new(repr.capacity);
        for record in repr.records {
            recent.push(record);
        }
        recent
    }
}

impl RecentEvents {
    /// Create an empty ring. A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: EventRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Change the capacity, dropping the oldest records if it shrinks.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    /// Scores of the last `window` coursework records, oldest first.
    ///
    /// Returns `None` until `window` coursework records are present.
    #[must_use]
    pub fn coursework_scores(&self, window: usize) -> Option<Vec<f64>> {
        let mut scores: Vec<f64> = self
            .records
            .iter()
            .rev()
            .filter_map(|r| r.score)
            .take(window)
            .collect();
        if scores.len() < window {
            return None;
        }
        scores.reverse();
        Some(scores)
    }
}

/// Decision state for one learner.
///
/// Fields are read through accessors; only the decision policy changes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerState {
    learner_id: LearnerId,
    current_level: DifficultyLevel,
    last_event_sequence: u64,
    recent_events: RecentEvents,
    cooldown_until: Option<DateTime<Utc>>,
    sel_alert_streak: u32,
    #[serde(default)]
    high_confidence_streak: u32,
    #[serde(default)]
    last_seen: Option<DateTime<Utc>>,
    /// Actions committed with this state whose delivery has not settled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pending_actions: Vec<Action>,
}

impl LearnerState {
    /// Fresh state at BEGINNER with no history.
    #[must_use]
    pub fn new(learner_id: LearnerId, recent_capacity: usize) -> Self {
        Self {
            learner_id,
            current_level: DifficultyLevel::default(),
            last_event_sequence: 0,
            recent_events: RecentEvents::new(recent_capacity),
            cooldown_until: None,
            sel_alert_streak: 0,
            high_confidence_streak: 0,
            last_seen: None,
            pending_actions: Vec::new(),
        }
    }

    /// Start from a known level, e.g. when seeding from an external record.
    #[must_use]
    pub fn with_level(mut self, level: DifficultyLevel) -> Self {
        self.current_level = level;
        self
    }

    #[must_use]
    pub fn learner_id(&self) -> &LearnerId {
        &self.learner_id
    }

    #[must_use]
    pub fn current_level(&self) -> DifficultyLevel {
        self.current_level
    }

    /// Highest sequence applied so far; zero before the first event.
    #[must_use]
    pub fn last_event_sequence(&self) -> u64 {
        self.last_event_sequence
    }

    #[must_use]
    pub fn recent_events(&self) -> &RecentEvents {
        &self.recent_events
    }

    #[must_use]
    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.cooldown_until
    }

    /// Whether a level suggestion at `now` would fall inside the cooldown window.
    #[must_use]
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    #[must_use]
    pub fn sel_alert_streak(&self) -> u32 {
        self.sel_alert_streak
    }

    /// Consecutive high-confidence, multi-band baselines.
    #[must_use]
    pub fn high_confidence_streak(&self) -> u32 {
        self.high_confidence_streak
    }

    /// Decision time of the last applied event.
    #[must_use]
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Actions emitted for an applied event that were neither delivered nor
    /// dead-lettered yet, oldest first.
    #[must_use]
    pub fn pending_actions(&self) -> &[Action] {
        &self.pending_actions
    }

    pub(crate) fn stage_actions(&mut self, actions: &[Action]) {
        self.pending_actions.extend_from_slice(actions);
    }

    /// Drop a pending action once its delivery settled. Returns whether it was pending.
    pub(crate) fn settle_action(&mut self, action_id: ActionId) -> bool {
        let before = self.pending_actions.len();
        self.pending_actions.retain(|a| a.action_id() != action_id);
        before != self.pending_actions.len()
    }

    pub(crate) fn set_level(&mut self, level: DifficultyLevel) {
        self.current_level = level;
    }

    /// Record `event` as applied at `now`.
    pub(crate) fn record(&mut self, event: &Event, now: DateTime<Utc>) {
        self.last_event_sequence = event.sequence();
        self.last_seen = Some(now);
        self.recent_events.push(EventRecord::from(event));
    }

    pub(crate) fn set_cooldown_until(&mut self, until: DateTime<Utc>) {
        self.cooldown_until = Some(until);
    }

    pub(crate) fn set_sel_alert_streak(&mut self, streak: u32) {
        self.sel_alert_streak = streak;
    }

    pub(crate) fn set_high_confidence_streak(&mut self, streak: u32) {
        self.high_confidence_streak = streak;
    }

    pub(crate) fn set_recent_capacity(&mut self, capacity: usize) {
        self.recent_events.set_capacity(capacity);
    }
}
