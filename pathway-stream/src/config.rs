//! Consumer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::traits::SeekPosition;

/// Configuration for a consumer group reading from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Consumer group name.
    pub group: String,

    /// Where to start reading from.
    pub start_position: SeekPosition,

    /// Maximum records per poll.
    pub batch_size: usize,

    /// How long a poll waits when no records are ready.
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// Back-off after a failed poll.
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
}

fn default_group() -> String {
    "orchestrator".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_error_backoff() -> Duration {
    Duration::from_secs(1)
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            start_position: SeekPosition::Committed,
            batch_size: default_batch_size(),
            poll_timeout: default_poll_timeout(),
            error_backoff: default_error_backoff(),
        }
    }
}

impl ConsumerConfig {
    /// Set the consumer group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Set the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the poll timeout.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the start position.
    #[must_use]
    pub fn with_start_position(mut self, position: SeekPosition) -> Self {
        self.start_position = position;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_values() {
        let config = ConsumerConfig::default();

        assert_eq!(config.group, "orchestrator");
        assert_eq!(config.start_position, SeekPosition::Committed);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.poll_timeout, Duration::from_secs(1));
        assert_eq!(config.error_backoff, Duration::from_secs(1));
    }

    #[test]
    fn config_builder_pattern() {
        let config = ConsumerConfig::default()
            .with_group("replay")
            .with_batch_size(10)
            .with_poll_timeout(Duration::from_millis(50))
            .with_start_position(SeekPosition::Beginning);

        assert_eq!(config.group, "replay");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.poll_timeout, Duration::from_millis(50));
        assert_eq!(config.start_position, SeekPosition::Beginning);
    }

    #[test]
    fn config_parses_humantime_durations() {
        let config: ConsumerConfig = toml::from_str(
            r#"
                group = "nightly"
                poll_timeout = "250ms"
                start_position = "beginning"
            "#,
        )
        .expect("parse consumer config");

        assert_eq!(config.group, "nightly");
        assert_eq!(config.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.start_position, SeekPosition::Beginning);
        assert_eq!(config.batch_size, 100);
    }
}
