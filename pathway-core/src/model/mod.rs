//! Event and action data contracts.

mod action;
mod event;
mod ids;
mod level;

pub use action::{
    Action, ActionPayload, ActionType, GameBreak, LevelSuggestion, SuggestionReason,
};
pub use event::{
    AlertSeverity, BaselineComplete, CourseworkAnalyzed, Event, EventPayload, EventType, SelAlert,
    SlpUpdated,
};
pub use ids::{ActionId, EventId, LearnerId};
pub use level::DifficultyLevel;
