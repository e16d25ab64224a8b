//! Decision policy.
//!
//! [`DecisionPolicy::evaluate`] maps a learner's state and a new event to the
//! actions to emit and the state to commit. It performs no I/O and reads no
//! clock: the decision time is an argument, so the same inputs always give
//! the same decision.
//!
//! Rules, per event type:
//!
//! | Event | Effect |
//! |-------|--------|
//! | any, `sequence <= last_event_sequence` | nothing; reported as duplicate |
//! | `BASELINE_COMPLETE` | `score_band >= 1` suggests one level up; repeated high-confidence multi-band baselines suggest `current + score_band` |
//! | `SLP_UPDATED` | sets `current_level` to the plan's target, if any; no action |
//! | `SEL_ALERT` | extends the streak (resolved alerts clear it); at threshold emits `GAME_BREAK` |
//! | `COURSEWORK_ANALYZED` | strictly monotonic scores over the trend window suggest one level up or down |
//!
//! Any event other than an alert clears the alert streak. Level suggestions
//! are suppressed inside the cooldown window and when the level is already
//! at the boundary in the suggested direction.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::PolicyConfig;
use crate::error::PolicyError;
use crate::model::{
    Action, ActionPayload, BaselineComplete, CourseworkAnalyzed, DifficultyLevel, Event,
    EventPayload, GameBreak, LevelSuggestion, SelAlert, SlpUpdated, SuggestionReason,
};
use crate::state::LearnerState;

/// Widest baseline band accepted, in either direction.
const MAX_SCORE_BAND: i8 = 4;

/// How an event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The event advanced the learner's state.
    Applied,
    /// The event was at or below the last applied sequence and was ignored.
    Duplicate { last_sequence: u64 },
}

/// Result of evaluating one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub actions: Vec<Action>,
    /// State to commit. Equal to the input state for duplicates.
    pub state: LearnerState,
    pub outcome: DecisionOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionPolicy {
    config: PolicyConfig,
}

impl DecisionPolicy {
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Evaluate `event` against `state` at time `now`.
    ///
    /// On error the caller keeps `state` as it was.
    pub fn evaluate(
        &self,
        state: &LearnerState,
        event: &Event,
        now: DateTime<Utc>,
    ) -> Result<Decision, PolicyError> {
        if event.sequence() <= state.last_event_sequence() {
            warn!(
                learner_id = %event.learner_id(),
                event_id = %event.event_id(),
                sequence = event.sequence(),
                last_sequence = state.last_event_sequence(),
                "Ignoring duplicate or out-of-order event"
            );
            return Ok(Decision {
                actions: Vec::new(),
                state: state.clone(),
                outcome: DecisionOutcome::Duplicate {
                    last_sequence: state.last_event_sequence(),
                },
            });
        }

        check_payload(event.payload())?;

        let mut next = state.clone();
        next.record(event, now);
        let mut actions = Vec::new();

        match event.payload() {
            EventPayload::BaselineComplete(baseline) => {
                next.set_sel_alert_streak(0);
                self.on_baseline(&mut next, baseline, event, now, &mut actions);
            }
            EventPayload::SlpUpdated(plan) => {
                next.set_sel_alert_streak(0);
                on_plan(&mut next, plan);
            }
            EventPayload::SelAlert(alert) => {
                self.on_alert(&mut next, alert, event, now, &mut actions);
            }
            EventPayload::CourseworkAnalyzed(_) => {
                next.set_sel_alert_streak(0);
                self.on_coursework(&mut next, event, now, &mut actions);
            }
        }

        Ok(Decision {
            actions,
            state: next,
            outcome: DecisionOutcome::Applied,
        })
    }

    fn on_baseline(
        &self,
        state: &mut LearnerState,
        baseline: &BaselineComplete,
        event: &Event,
        now: DateTime<Utc>,
        actions: &mut Vec<Action>,
    ) {
        let high_confidence = baseline.score_band >= 2
            && baseline
                .confidence
                .is_some_and(|c| c >= self.config.high_confidence);
        let streak = if high_confidence {
            state.high_confidence_streak().saturating_add(1)
        } else {
            0
        };
        state.set_high_confidence_streak(streak);

        if baseline.score_band < 1 {
            return;
        }

        let current = state.current_level();
        if high_confidence && streak >= self.config.override_after {
            let target = current.shifted(i32::from(baseline.score_band));
            if self.suggest(state, target, SuggestionReason::BaselineOverride, event, now, actions) {
                state.set_high_confidence_streak(0);
            }
        } else {
            self.suggest(state, current.step_up(), SuggestionReason::Baseline, event, now, actions);
        }
    }

    fn on_alert(
        &self,
        state: &mut LearnerState,
        alert: &SelAlert,
        event: &Event,
        now: DateTime<Utc>,
        actions: &mut Vec<Action>,
    ) {
        if alert.resolved {
            state.set_sel_alert_streak(0);
            return;
        }

        let streak = state.sel_alert_streak().saturating_add(1);
        if streak >= self.config.sel_alert_threshold {
            debug!(learner_id = %event.learner_id(), streak, "Alert threshold reached");
            actions.push(Action::new(
                event.learner_id().clone(),
                ActionPayload::GameBreak(GameBreak { streak }),
                event.event_id(),
                now,
            ));
            state.set_sel_alert_streak(0);
        } else {
            state.set_sel_alert_streak(streak);
        }
    }

    fn on_coursework(
        &self,
        state: &mut LearnerState,
        event: &Event,
        now: DateTime<Utc>,
        actions: &mut Vec<Action>,
    ) {
        let Some(scores) = state
            .recent_events()
            .coursework_scores(self.config.trend_window)
        else {
            return;
        };

        let current = state.current_level();
        if scores.windows(2).all(|w| w[0] < w[1]) {
            self.suggest(state, current.step_up(), SuggestionReason::TrendUp, event, now, actions);
        } else if scores.windows(2).all(|w| w[0] > w[1]) {
            self.suggest(state, current.step_down(), SuggestionReason::TrendDown, event, now, actions);
        }
    }

    /// Emit a level suggestion unless it is a no-op or the learner is cooling down.
    /// Returns whether an action was emitted.
    fn suggest(
        &self,
        state: &mut LearnerState,
        target: DifficultyLevel,
        reason: SuggestionReason,
        event: &Event,
        now: DateTime<Utc>,
        actions: &mut Vec<Action>,
    ) -> bool {
        let current = state.current_level();
        if target == current {
            debug!(learner_id = %event.learner_id(), level = %current, "Already at boundary");
            return false;
        }
        if state.in_cooldown(now) {
            debug!(
                learner_id = %event.learner_id(),
                cooldown_until = ?state.cooldown_until(),
                "Suggestion suppressed by cooldown"
            );
            return false;
        }

        let cooldown =
            chrono::Duration::from_std(self.config.cooldown).unwrap_or(chrono::Duration::MAX);
        state.set_level(target);
        state.set_cooldown_until(now.checked_add_signed(cooldown).unwrap_or(DateTime::<Utc>::MAX_UTC));
        actions.push(Action::new(
            event.learner_id().clone(),
            ActionPayload::LevelSuggested(LevelSuggestion {
                level: target,
                previous_level: current,
                reason,
            }),
            event.event_id(),
            now,
        ));
        true
    }
}

fn on_plan(state: &mut LearnerState, plan: &SlpUpdated) {
    if let Some(target) = plan.target_level {
        state.set_level(target);
    }
}

fn check_payload(payload: &EventPayload) -> Result<(), PolicyError> {
    match payload {
        EventPayload::BaselineComplete(b) => {
            if !(-MAX_SCORE_BAND..=MAX_SCORE_BAND).contains(&b.score_band) {
                return Err(PolicyError::InvalidPayload {
                    event_type: "BASELINE_COMPLETE",
                    field: "score_band",
                    reason: format!("{} outside -{MAX_SCORE_BAND}..={MAX_SCORE_BAND}", b.score_band),
                });
            }
            if let Some(c) = b.confidence {
                check_unit("BASELINE_COMPLETE", "confidence", c)?;
            }
            Ok(())
        }
        EventPayload::CourseworkAnalyzed(CourseworkAnalyzed { score }) => {
            check_unit("COURSEWORK_ANALYZED", "score", *score)
        }
        EventPayload::SlpUpdated(_) | EventPayload::SelAlert(_) => Ok(()),
    }
}

fn check_unit(event_type: &'static str, field: &'static str, value: f64) -> Result<(), PolicyError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PolicyError::InvalidPayload {
            event_type,
            field,
            reason: format!("{value} outside [0, 1]"),
        })
    }
}
