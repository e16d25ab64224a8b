//! Orchestrator configuration types.
//!
//! Every section defaults, so a TOML file only needs the values it changes:
//!
//! ```toml
//! [policy]
//! cooldown = "15m"
//! sel_alert_threshold = 4
//!
//! [engine]
//! lanes = 8
//! ```

use std::path::Path;
use std::time::Duration;

use pathway_stream::ConsumerConfig;
use serde::{Deserialize, Serialize};

use crate::delivery::RetryPolicy;
use crate::error::ConfigError;

/// Main configuration for the orchestration engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Decision thresholds.
    pub policy: PolicyConfig,
    /// Lane pool and lifecycle.
    pub engine: EngineConfig,
    /// Publish retry behaviour.
    pub delivery: RetryPolicy,
    /// Learner state retention.
    pub state: StateConfig,
    /// Inbound stream subscription.
    pub consumer: ConsumerConfig,
}

impl OrchestratorConfig {
    /// Parse from TOML text. Missing sections and fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()?;
        self.engine.validate()?;
        self.delivery.validate()?;
        if self.consumer.batch_size == 0 {
            return Err(invalid("consumer.batch_size", "must be at least 1"));
        }
        if self.state.sweep_interval.is_zero() {
            return Err(invalid("state.sweep_interval", "must be non-zero"));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: RetryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: StateConfig) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_consumer(mut self, consumer: ConsumerConfig) -> Self {
        self.consumer = consumer;
        self
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Named, overridable decision thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minimum gap between two level suggestions for one learner.
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Consecutive unresolved SEL alerts that trigger a game break.
    pub sel_alert_threshold: u32,
    /// Coursework results that must trend the same way before a suggestion.
    pub trend_window: usize,
    /// Recent events kept per learner.
    pub recent_events_capacity: usize,
    /// Confidence at or above which a baseline counts as high-confidence.
    pub high_confidence: f64,
    /// Consecutive high-confidence baselines needed to jump more than one level.
    pub override_after: u32,
}

fn default_cooldown() -> Duration {
    Duration::from_secs(10 * 60)
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cooldown: default_cooldown(),
            sel_alert_threshold: 3,
            trend_window: 3,
            recent_events_capacity: 20,
            high_confidence: 0.9,
            override_after: 2,
        }
    }
}

impl PolicyConfig {
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_sel_alert_threshold(mut self, threshold: u32) -> Self {
        self.sel_alert_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_trend_window(mut self, window: usize) -> Self {
        self.trend_window = window;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sel_alert_threshold == 0 {
            return Err(invalid("policy.sel_alert_threshold", "must be at least 1"));
        }
        if self.trend_window < 2 {
            return Err(invalid("policy.trend_window", "must be at least 2"));
        }
        if self.recent_events_capacity < self.trend_window {
            return Err(invalid(
                "policy.recent_events_capacity",
                format!("must be at least trend_window ({})", self.trend_window),
            ));
        }
        if !(0.0..=1.0).contains(&self.high_confidence) {
            return Err(invalid("policy.high_confidence", "must be within [0, 1]"));
        }
        if self.override_after == 0 {
            return Err(invalid("policy.override_after", "must be at least 1"));
        }
        if chrono::Duration::from_std(self.cooldown).is_err() {
            return Err(invalid("policy.cooldown", "out of range"));
        }
        Ok(())
    }
}

/// Lane pool and lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker lanes. Learners are spread over lanes by id.
    pub lanes: usize,
    /// Events queued per lane before intake waits.
    pub lane_queue_capacity: usize,
    /// How long shutdown waits for lanes to finish queued work.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lanes: 4,
            lane_queue_capacity: 64,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes;
        self
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lanes == 0 {
            return Err(invalid("engine.lanes", "must be at least 1"));
        }
        if self.lane_queue_capacity == 0 {
            return Err(invalid("engine.lane_queue_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// Learner state retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Evict learners not seen for this long. Unset keeps them for the process lifetime.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub idle_ttl: Option<Duration>,
    /// How often the idle sweeper runs.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            idle_ttl: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl StateConfig {
    #[must_use]
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OrchestratorConfig::default();
        config.validate().unwrap();

        assert_eq!(config.policy.cooldown, Duration::from_secs(600));
        assert_eq!(config.policy.sel_alert_threshold, 3);
        assert_eq!(config.policy.trend_window, 3);
        assert_eq!(config.delivery.base, Duration::from_millis(200));
        assert_eq!(config.delivery.cap, Duration::from_secs(5));
        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.state.idle_ttl, None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            [policy]
            cooldown = "15m"

            [engine]
            lanes = 8

            [state]
            idle_ttl = "2h"
            "#,
        )
        .unwrap();

        assert_eq!(config.policy.cooldown, Duration::from_secs(900));
        assert_eq!(config.policy.sel_alert_threshold, 3);
        assert_eq!(config.engine.lanes, 8);
        assert_eq!(config.engine.lane_queue_capacity, 64);
        assert_eq!(config.state.idle_ttl, Some(Duration::from_secs(7200)));
    }

    #[test]
    fn capacity_below_window_is_rejected() {
        let err = OrchestratorConfig::from_toml_str(
            r#"
            [policy]
            trend_window = 5
            recent_events_capacity = 4
            "#,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "policy.recent_events_capacity",
                ..
            }
        ));
    }

    #[test]
    fn zero_lanes_is_rejected() {
        let config = OrchestratorConfig::default().with_engine(EngineConfig::default().with_lanes(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_output_parses_back() {
        let config = OrchestratorConfig::default()
            .with_state(StateConfig::default().with_idle_ttl(Duration::from_secs(3600)));
        let text = config.to_toml_string().unwrap();

        assert!(text.contains("cooldown = \"10m\""));
        assert_eq!(OrchestratorConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[consumer]\ngroup = \"replay\"\n").unwrap();

        let config = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(config.consumer.group, "replay");
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = OrchestratorConfig::from_toml_str("[policy\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
