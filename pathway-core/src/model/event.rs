//! Inbound learner events.
//!
//! Events arrive as JSON records shaped like
//!
//! ```json
//! {
//!   "event_id": "0190f3a4-...",
//!   "learner_id": "learner-7",
//!   "event_type": "BASELINE_COMPLETE",
//!   "payload": { "score_band": 1, "confidence": 0.8 },
//!   "occurred_at": "2026-03-01T10:00:00Z",
//!   "sequence": 1
//! }
//! ```
//!
//! Decoding runs the same validation as [`Event::new`], so an `Event` value
//! is always well-formed: non-empty learner id, positive sequence, a known
//! event type and a payload matching it. Unknown payload fields are ignored
//! and optional ones default, so producers can add fields freely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EventId, LearnerId};
use super::level::DifficultyLevel;
use crate::error::ValidationError;

/// The kinds of event the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    BaselineComplete,
    SlpUpdated,
    SelAlert,
    CourseworkAnalyzed,
}

impl EventType {
    /// Convert to wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BaselineComplete => "BASELINE_COMPLETE",
            Self::SlpUpdated => "SLP_UPDATED",
            Self::SelAlert => "SEL_ALERT",
            Self::CourseworkAnalyzed => "COURSEWORK_ANALYZED",
        }
    }

    /// Parse from wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BASELINE_COMPLETE" => Some(Self::BaselineComplete),
            "SLP_UPDATED" => Some(Self::SlpUpdated),
            "SEL_ALERT" => Some(Self::SelAlert),
            "COURSEWORK_ANALYZED" => Some(Self::CourseworkAnalyzed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity reported with a socio-emotional alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Low,
    #[default]
    Medium,
    High,
}

/// Baseline assessment finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineComplete {
    /// Performance band relative to the learner's current level; +1 is one band above.
    pub score_band: i8,
    /// Assessor confidence in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Speech/language plan changed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlpUpdated {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    /// Level the plan places the learner at, when it names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_level: Option<DifficultyLevel>,
}

/// Socio-emotional learning alert.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelAlert {
    pub severity: AlertSeverity,
    /// A resolved alert clears the streak instead of extending it.
    pub resolved: bool,
}

/// Coursework scored by the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseworkAnalyzed {
    /// Normalized score in `[0, 1]`.
    pub score: f64,
}

/// Type-specific event data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    BaselineComplete(BaselineComplete),
    SlpUpdated(SlpUpdated),
    SelAlert(SelAlert),
    CourseworkAnalyzed(CourseworkAnalyzed),
}

impl EventPayload {
    /// The event type this payload belongs to.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::BaselineComplete(_) => EventType::BaselineComplete,
            Self::SlpUpdated(_) => EventType::SlpUpdated,
            Self::SelAlert(_) => EventType::SelAlert,
            Self::CourseworkAnalyzed(_) => EventType::CourseworkAnalyzed,
        }
    }

    fn decode(event_type: EventType, value: serde_json::Value) -> Result<Self, ValidationError> {
        let value = match value {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            other => other,
        };

        let decoded = match event_type {
            EventType::BaselineComplete => serde_json::from_value(value).map(Self::BaselineComplete),
            EventType::SlpUpdated => serde_json::from_value(value).map(Self::SlpUpdated),
            EventType::SelAlert => serde_json::from_value(value).map(Self::SelAlert),
            EventType::CourseworkAnalyzed => {
                serde_json::from_value(value).map(Self::CourseworkAnalyzed)
            }
        };

        decoded.map_err(|e| ValidationError::MalformedPayload {
            event_type: event_type.as_str().to_string(),
            reason: e.to_string(),
        })
    }
}

/// An immutable, validated learner event.
///
/// Identity is the `event_id`: two events with the same id are equal no
/// matter what else they carry.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawEvent")]
pub struct Event {
    event_id: EventId,
    learner_id: LearnerId,
    payload: EventPayload,
    occurred_at: DateTime<Utc>,
    sequence: u64,
}

impl Event {
    /// Build an event with a freshly generated id.
    pub fn new(
        learner_id: impl Into<LearnerId>,
        sequence: u64,
        occurred_at: DateTime<Utc>,
        payload: EventPayload,
    ) -> Result<Self, ValidationError> {
        Self::with_id(EventId::new(), learner_id, sequence, occurred_at, payload)
    }

    /// Build an event with a producer-assigned id.
    pub fn with_id(
        event_id: EventId,
        learner_id: impl Into<LearnerId>,
        sequence: u64,
        occurred_at: DateTime<Utc>,
        payload: EventPayload,
    ) -> Result<Self, ValidationError> {
        let learner_id = learner_id.into();
        if learner_id.is_blank() {
            return Err(ValidationError::EmptyLearnerId);
        }
        if sequence == 0 {
            return Err(ValidationError::NonPositiveSequence(0));
        }

        Ok(Self {
            event_id,
            learner_id,
            payload,
            occurred_at,
            sequence,
        })
    }

    /// Decode and validate a JSON record.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ValidationError> {
        let raw: RawEvent =
            serde_json::from_slice(bytes).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }

    /// Encode as a JSON record.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    #[must_use]
    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    #[must_use]
    pub fn learner_id(&self) -> &LearnerId {
        &self.learner_id
    }

    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Producer-assigned, per-learner monotonic counter.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.event_id == other.event_id
    }
}

impl Eq for Event {}

impl std::hash::Hash for Event {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.event_id.hash(state);
    }
}

#[derive(Serialize)]
struct WireEvent<'a> {
    event_id: EventId,
    learner_id: &'a LearnerId,
    event_type: EventType,
    payload: &'a EventPayload,
    occurred_at: DateTime<Utc>,
    sequence: u64,
}

impl Serialize for Event {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEvent {
            event_id: self.event_id,
            learner_id: &self.learner_id,
            event_type: self.event_type(),
            payload: &self.payload,
            occurred_at: self.occurred_at,
            sequence: self.sequence,
        }
        .serialize(serializer)
    }
}

/// Undecoded wire record. `event_type` stays a string so unknown types are
/// reported as such rather than as a generic decode failure.
#[derive(Deserialize)]
struct RawEvent {
    event_id: EventId,
    learner_id: LearnerId,
    event_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
    sequence: i64,
}

impl TryFrom<RawEvent> for Event {
    type Error = ValidationError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        if raw.learner_id.is_blank() {
            return Err(ValidationError::EmptyLearnerId);
        }
        let sequence = u64::try_from(raw.sequence)
            .ok()
            .filter(|s| *s > 0)
            .ok_or(ValidationError::NonPositiveSequence(raw.sequence))?;
        let event_type = EventType::parse(&raw.event_type)
            .ok_or_else(|| ValidationError::UnknownEventType(raw.event_type.clone()))?;
        let payload = EventPayload::decode(event_type, raw.payload)?;

        Self::with_id(
            raw.event_id,
            raw.learner_id,
            sequence,
            raw.occurred_at,
            payload,
        )
    }
}
