//! Versioned, JSON-encoded dump of the learner store.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::learner::LearnerState;
use crate::error::{Error, Result};

/// Current snapshot format.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    /// Learners ordered by id.
    pub learners: Vec<LearnerState>,
}

impl StateSnapshot {
    #[must_use]
    pub fn new(taken_at: DateTime<Utc>, mut learners: Vec<LearnerState>) -> Self {
        learners.sort_by(|a, b| a.learner_id().cmp(b.learner_id()));
        Self {
            version: SNAPSHOT_VERSION,
            taken_at,
            learners,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.learners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.learners.is_empty()
    }

    /// Write as pretty JSON, replacing the file atomically.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a snapshot written by [`StateSnapshot::write_to`].
    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let snapshot: Self = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::UnsupportedSnapshot(snapshot.version));
        }
        Ok(snapshot)
    }
}
