//! Publisher that writes each action as one JSON line on stdout.

use std::io::Write;

use async_trait::async_trait;
use pathway_core::{Action, ActionPublisher, PublishError};

#[derive(Debug, Default)]
pub struct StdoutPublisher;

impl StdoutPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActionPublisher for StdoutPublisher {
    async fn publish(&self, action: &Action) -> Result<(), PublishError> {
        let line =
            serde_json::to_string(action).map_err(|e| PublishError::Permanent(e.to_string()))?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}").map_err(|e| PublishError::Retryable(e.to_string()))
    }
}
