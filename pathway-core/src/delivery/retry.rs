//! Bounded exponential backoff for action delivery.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::dead_letter::{DeadLetter, DeadLetterSink};
use super::publisher::ActionPublisher;
use crate::clock::Clock;
use crate::error::ConfigError;
use crate::model::Action;

/// Retry schedule for publishing an action.
///
/// Attempt `n` that fails with a retryable error is followed by a wait of
/// `min(base * 2^(n-1), cap)`, until `max_attempts` attempts have been made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(with = "humantime_serde")]
    pub base: Duration,
    #[serde(with = "humantime_serde")]
    pub cap: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            cap: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Wait after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "delivery.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.base > self.cap {
            return Err(ConfigError::Invalid {
                field: "delivery.base",
                reason: "must not exceed delivery.cap".to_string(),
            });
        }
        Ok(())
    }
}

/// How delivery of one action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    DeadLettered { attempts: u32, reason: String },
}

impl DeliveryOutcome {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts } | Self::DeadLettered { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Publish `action`, retrying retryable failures per `policy`. Permanent
/// failures and exhausted retries go to `dead_letter`.
pub async fn deliver(
    publisher: &dyn ActionPublisher,
    dead_letter: &dyn DeadLetterSink,
    action: &Action,
    policy: &RetryPolicy,
    clock: &dyn Clock,
) -> DeliveryOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    let reason = loop {
        attempt += 1;
        match publisher.publish(action).await {
            Ok(()) => {
                debug!(action_id = %action.action_id(), attempt, "Action delivered");
                return DeliveryOutcome::Delivered { attempts: attempt };
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    action_id = %action.action_id(),
                    learner_id = %action.learner_id(),
                    attempt,
                    ?delay,
                    error = %e,
                    "Publish failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => break e.to_string(),
        }
    };

    warn!(
        action_id = %action.action_id(),
        learner_id = %action.learner_id(),
        action_type = %action.action_type(),
        attempts = attempt,
        %reason,
        "Dead-lettering action"
    );
    dead_letter
        .record(DeadLetter {
            action: action.clone(),
            reason: reason.clone(),
            attempts: attempt,
            failed_at: clock.now(),
        })
        .await;

    DeliveryOutcome::DeadLettered {
        attempts: attempt,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::delivery::{InMemoryDeadLetter, InMemoryPublisher};
    use crate::error::PublishError;
    use crate::model::{ActionPayload, EventId, GameBreak};
    use chrono::Utc;

    fn action() -> Action {
        Action::new(
            "l1".into(),
            ActionPayload::GameBreak(GameBreak { streak: 3 }),
            EventId::new(),
            Utc::now(),
        )
    }

    #[test]
    fn delay_doubles_up_to_cap() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(3200));
        assert_eq!(policy.delay_for(6), Duration::from_secs(5));
        assert_eq!(policy.delay_for(200), Duration::from_secs(5));
    }

    #[test]
    fn zero_attempts_is_invalid() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 0);
        assert!(policy.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let publisher = InMemoryPublisher::new();
        publisher
            .fail_next(2, PublishError::Retryable("timeout".into()))
            .await;
        let dead = InMemoryDeadLetter::new();
        let started = tokio::time::Instant::now();

        let outcome = deliver(
            &publisher,
            &dead,
            &action(),
            &RetryPolicy::default(),
            &SystemClock,
        )
        .await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        assert!(dead.is_empty().await);
        // 200ms + 400ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_dead_letter() {
        let publisher = InMemoryPublisher::new();
        publisher
            .fail_always(PublishError::Retryable("unreachable".into()))
            .await;
        let dead = InMemoryDeadLetter::new();
        let action = action();

        let outcome = deliver(
            &publisher,
            &dead,
            &action,
            &RetryPolicy::default(),
            &SystemClock,
        )
        .await;

        assert_eq!(outcome.attempts(), 5);
        assert!(!outcome.is_delivered());
        assert_eq!(publisher.attempts(), 5);

        let entries = dead.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, action);
        assert_eq!(entries[0].attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_skips_retries() {
        let publisher = InMemoryPublisher::new();
        publisher
            .fail_next(1, PublishError::Permanent("schema rejected".into()))
            .await;
        let dead = InMemoryDeadLetter::new();

        let outcome = deliver(
            &publisher,
            &dead,
            &action(),
            &RetryPolicy::default(),
            &SystemClock,
        )
        .await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::DeadLettered { attempts: 1, ref reason } if reason.contains("schema rejected")
        ));
        assert_eq!(publisher.attempts(), 1);
        assert_eq!(dead.len().await, 1);
    }
}
