//! Dead-letter sink for actions that could not be delivered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::model::Action;

/// An action that exhausted delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub action: Action,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, entry: DeadLetter);
}

/// Keeps dead letters in memory.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetter {
    entries: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<DeadLetter> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetter {
    async fn record(&self, entry: DeadLetter) {
        self.entries.lock().await.push(entry);
    }
}
