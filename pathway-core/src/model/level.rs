//! Difficulty levels.

use serde::{Deserialize, Serialize};

/// Instructional difficulty tier, ordered from easiest to hardest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifficultyLevel {
    #[default]
    Beginner,
    Elementary,
    Intermediate,
    Proficient,
    Advanced,
}

impl DifficultyLevel {
    /// Every level, lowest first.
    pub const ALL: [Self; 5] = [
        Self::Beginner,
        Self::Elementary,
        Self::Intermediate,
        Self::Proficient,
        Self::Advanced,
    ];

    /// Zero-based position in the ordering.
    #[must_use]
    pub fn rank(self) -> usize {
        self as usize
    }

    /// Level at a zero-based position.
    #[must_use]
    pub fn from_rank(rank: usize) -> Option<Self> {
        Self::ALL.get(rank).copied()
    }

    /// Move by `steps` (negative moves down), clamped to the BEGINNER..=ADVANCED range.
    #[must_use]
    pub fn shifted(self, steps: i32) -> Self {
        let max = (Self::ALL.len() - 1) as i64;
        let target = (self.rank() as i64 + i64::from(steps)).clamp(0, max);
        Self::ALL[target as usize]
    }

    /// One level harder, or unchanged at the top.
    #[must_use]
    pub fn step_up(self) -> Self {
        self.shifted(1)
    }

    /// One level easier, or unchanged at the bottom.
    #[must_use]
    pub fn step_down(self) -> Self {
        self.shifted(-1)
    }

    /// Convert to wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "BEGINNER",
            Self::Elementary => "ELEMENTARY",
            Self::Intermediate => "INTERMEDIATE",
            Self::Proficient => "PROFICIENT",
            Self::Advanced => "ADVANCED",
        }
    }

    /// Parse from wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == s)
    }
}

impl std::fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
