//! Outbound actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ActionId, EventId, LearnerId};
use super::level::DifficultyLevel;
use crate::error::ValidationError;

/// The kinds of action the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    LevelSuggested,
    GameBreak,
}

impl ActionType {
    /// Convert to wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LevelSuggested => "LEVEL_SUGGESTED",
            Self::GameBreak => "GAME_BREAK",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a level change was suggested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionReason {
    /// Baseline one band above the current level.
    Baseline,
    /// Repeated high-confidence baselines well above the current level.
    BaselineOverride,
    /// Coursework scores consistently rising.
    TrendUp,
    /// Coursework scores consistently falling.
    TrendDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSuggestion {
    pub level: DifficultyLevel,
    pub previous_level: DifficultyLevel,
    pub reason: SuggestionReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameBreak {
    /// Alert streak that triggered the break.
    pub streak: u32,
}

/// Type-specific action data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ActionPayload {
    LevelSuggested(LevelSuggestion),
    GameBreak(GameBreak),
}

impl ActionPayload {
    #[must_use]
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::LevelSuggested(_) => ActionType::LevelSuggested,
            Self::GameBreak(_) => ActionType::GameBreak,
        }
    }
}

/// An immutable action emitted in response to an event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawAction")]
pub struct Action {
    action_id: ActionId,
    learner_id: LearnerId,
    payload: ActionPayload,
    caused_by: EventId,
    emitted_at: DateTime<Utc>,
}

impl Action {
    /// Create an action. The id is derived from `caused_by` and the action type.
    #[must_use]
    pub fn new(
        learner_id: LearnerId,
        payload: ActionPayload,
        caused_by: EventId,
        emitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action_id: ActionId::derive(&caused_by, payload.action_type().as_str()),
            learner_id,
            payload,
            caused_by,
            emitted_at,
        }
    }

    #[must_use]
    pub fn action_id(&self) -> ActionId {
        self.action_id
    }

    #[must_use]
    pub fn learner_id(&self) -> &LearnerId {
        &self.learner_id
    }

    #[must_use]
    pub fn action_type(&self) -> ActionType {
        self.payload.action_type()
    }

    #[must_use]
    pub fn payload(&self) -> &ActionPayload {
        &self.payload
    }

    /// Id of the event that triggered this action.
    #[must_use]
    pub fn caused_by(&self) -> EventId {
        self.caused_by
    }

    #[must_use]
    pub fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }

    /// Suggested level, for LEVEL_SUGGESTED actions.
    #[must_use]
    pub fn suggested_level(&self) -> Option<DifficultyLevel> {
        match &self.payload {
            ActionPayload::LevelSuggested(s) => Some(s.level),
            ActionPayload::GameBreak(_) => None,
        }
    }
}

#[derive(Serialize)]
struct WireAction<'a> {
    action_id: ActionId,
    learner_id: &'a LearnerId,
    action_type: ActionType,
    payload: &'a ActionPayload,
    caused_by: EventId,
    emitted_at: DateTime<Utc>,
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireAction {
            action_id: self.action_id,
            learner_id: &self.learner_id,
            action_type: self.action_type(),
            payload: &self.payload,
            caused_by: self.caused_by,
            emitted_at: self.emitted_at,
        }
        .serialize(serializer)
    }
}

#[derive(Deserialize)]
struct RawAction {
    action_id: ActionId,
    learner_id: LearnerId,
    action_type: ActionType,
    payload: serde_json::Value,
    caused_by: EventId,
    emitted_at: DateTime<Utc>,
}

impl TryFrom<RawAction> for Action {
    type Error = ValidationError;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        let payload = match raw.action_type {
            ActionType::LevelSuggested => {
                serde_json::from_value(raw.payload).map(ActionPayload::LevelSuggested)
            }
            ActionType::GameBreak => serde_json::from_value(raw.payload).map(ActionPayload::GameBreak),
        }
        .map_err(|e| ValidationError::MalformedPayload {
            event_type: raw.action_type.as_str().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            action_id: raw.action_id,
            learner_id: raw.learner_id,
            payload,
            caused_by: raw.caused_by,
            emitted_at: raw.emitted_at,
        })
    }
}
