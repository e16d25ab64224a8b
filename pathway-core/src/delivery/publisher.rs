//! Action publishers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::PublishError;
use crate::model::{Action, ActionType};

/// Delivers actions to a downstream collaborator.
#[async_trait]
pub trait ActionPublisher: Send + Sync {
    /// Deliver one action. Failures say whether a retry could succeed.
    async fn publish(&self, action: &Action) -> Result<(), PublishError>;
}

/// Routes each action type to the service that acts on it.
pub struct ActionRouter {
    notifications: Arc<dyn ActionPublisher>,
    game_generation: Arc<dyn ActionPublisher>,
}

impl ActionRouter {
    /// LEVEL_SUGGESTED goes to `notifications`, GAME_BREAK to `game_generation`.
    pub fn new(
        notifications: Arc<dyn ActionPublisher>,
        game_generation: Arc<dyn ActionPublisher>,
    ) -> Self {
        Self {
            notifications,
            game_generation,
        }
    }
}

#[async_trait]
impl ActionPublisher for ActionRouter {
    async fn publish(&self, action: &Action) -> Result<(), PublishError> {
        let target = match action.action_type() {
            ActionType::LevelSuggested => &self.notifications,
            ActionType::GameBreak => &self.game_generation,
        };
        trace!(action_id = %action.action_id(), action_type = %action.action_type(), "Routing action");
        target.publish(action).await
    }
}

#[derive(Debug)]
enum FailureMode {
    /// Fail the next queued calls, then succeed.
    Queued(VecDeque<PublishError>),
    /// Fail every call.
    Always(PublishError),
}

/// Records published actions in memory. Can be told to fail.
#[derive(Debug)]
pub struct InMemoryPublisher {
    published: Mutex<Vec<Action>>,
    failures: Mutex<FailureMode>,
    attempts: AtomicUsize,
}

impl Default for InMemoryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            failures: Mutex::new(FailureMode::Queued(VecDeque::new())),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` publishes with `error`.
    pub async fn fail_next(&self, count: usize, error: PublishError) {
        let mut failures = self.failures.lock().await;
        match &mut *failures {
            FailureMode::Queued(queue) => {
                queue.extend(std::iter::repeat_n(error, count));
            }
            FailureMode::Always(_) => {
                *failures = FailureMode::Queued(std::iter::repeat_n(error, count).collect());
            }
        }
    }

    /// Fail every publish with `error` until [`InMemoryPublisher::recover`].
    pub async fn fail_always(&self, error: PublishError) {
        *self.failures.lock().await = FailureMode::Always(error);
    }

    /// Stop failing.
    pub async fn recover(&self) {
        *self.failures.lock().await = FailureMode::Queued(VecDeque::new());
    }

    /// Actions published successfully, in order.
    pub async fn published(&self) -> Vec<Action> {
        self.published.lock().await.clone()
    }

    /// Publish calls made, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ActionPublisher for InMemoryPublisher {
    async fn publish(&self, action: &Action) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let failure = match &mut *self.failures.lock().await {
            FailureMode::Queued(queue) => queue.pop_front(),
            FailureMode::Always(error) => Some(error.clone()),
        };
        if let Some(error) = failure {
            return Err(error);
        }

        self.published.lock().await.push(action.clone());
        Ok(())
    }
}
