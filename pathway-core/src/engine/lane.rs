//! Worker lanes.
//!
//! Every event for a learner goes to the same lane, and a lane handles one
//! event at a time, so a learner's read-evaluate-commit-publish sequence
//! never overlaps with another for the same learner.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use super::status::{DispatchOutcome, DispatchReport, Metrics};
use crate::clock::Clock;
use crate::delivery::{ActionPublisher, DeadLetterSink, RetryPolicy, deliver};
use crate::model::{Action, Event, EventId, LearnerId};
use crate::policy::{DecisionOutcome, DecisionPolicy};
use crate::state::{LearnerState, LearnerStateStore};

/// Where a job came from, and so where its result goes.
pub(crate) enum Origin {
    /// A direct `dispatch` caller waiting for the report.
    Direct(oneshot::Sender<DispatchReport>),
    /// The intake task, which acks the event on the stream.
    Stream,
}

pub(crate) struct LaneJob {
    pub event: Event,
    pub origin: Origin,
}

/// Everything a lane needs to process an event.
pub(crate) struct LaneContext {
    pub store: Arc<LearnerStateStore>,
    pub policy: DecisionPolicy,
    pub publisher: Arc<dyn ActionPublisher>,
    pub dead_letter: Arc<dyn DeadLetterSink>,
    pub clock: Arc<dyn Clock>,
    pub retry: RetryPolicy,
    pub metrics: Arc<Metrics>,
}

/// Run a lane until every job sender is dropped.
pub(crate) async fn run_lane(
    lane: usize,
    ctx: Arc<LaneContext>,
    mut jobs: mpsc::Receiver<LaneJob>,
    acks: mpsc::UnboundedSender<EventId>,
) {
    debug!(lane, "Lane started");

    while let Some(LaneJob { event, origin }) = jobs.recv().await {
        let event_id = event.event_id();
        let report = process_event(&ctx, lane, event).await;

        match origin {
            Origin::Direct(reply) => {
                if reply.send(report).is_err() {
                    trace!(lane, %event_id, "Dispatch caller went away");
                }
            }
            Origin::Stream => {
                if acks.send(event_id).is_err() {
                    trace!(lane, %event_id, "Intake gone, ack dropped");
                }
            }
        }
    }

    debug!(lane, "Lane stopped");
}

/// Evaluate one event, commit the new state together with its actions, then
/// deliver them.
///
/// Actions stay pending in the committed state until their delivery settles,
/// so an interrupted lane leaves them in any snapshot taken afterwards. They
/// are delivered before the learner's next event is evaluated, which covers
/// the redelivery of the interrupted event itself.
pub(crate) async fn process_event(ctx: &LaneContext, lane: usize, event: Event) -> DispatchReport {
    let learner_id = event.learner_id().clone();
    let event_id = event.event_id();
    let mut state = ctx.store.get_or_create(&learner_id);

    if !state.pending_actions().is_empty() {
        redeliver_pending(ctx, lane, &state).await;
        state = ctx.store.get_or_create(&learner_id);
    }

    let now = ctx.clock.now();

    trace!(
        lane,
        learner_id = %learner_id,
        sequence = event.sequence(),
        event_type = %event.event_type(),
        "Evaluating event"
    );

    let decision = match ctx.policy.evaluate(&state, &event, now) {
        Ok(decision) => decision,
        Err(e) => {
            error!(lane, learner_id = %learner_id, %event_id, error = %e, "Policy evaluation failed");
            ctx.metrics.policy_error();
            return DispatchReport {
                event_id,
                learner_id,
                outcome: DispatchOutcome::HandledWithError {
                    reason: e.to_string(),
                },
            };
        }
    };

    if let DecisionOutcome::Duplicate { .. } = decision.outcome {
        ctx.metrics.duplicate();
        return DispatchReport {
            event_id,
            learner_id,
            outcome: DispatchOutcome::Duplicate,
        };
    }

    let mut next = decision.state;
    next.stage_actions(&decision.actions);
    ctx.store.commit(&learner_id, next);
    ctx.metrics.event_processed();

    let mut dead_lettered = 0;
    for action in &decision.actions {
        ctx.metrics.action_emitted();
        if !settle(ctx, &learner_id, action).await {
            dead_lettered += 1;
        }
    }

    debug!(
        lane,
        learner_id = %learner_id,
        sequence = event.sequence(),
        actions = decision.actions.len(),
        dead_lettered,
        "Event processed"
    );

    DispatchReport {
        event_id,
        learner_id,
        outcome: DispatchOutcome::Processed {
            actions: decision.actions,
            dead_lettered,
        },
    }
}

/// Deliver (or dead-letter) one action, then drop it from the learner's
/// pending actions. Returns whether it was delivered.
async fn settle(ctx: &LaneContext, learner_id: &LearnerId, action: &Action) -> bool {
    let outcome = deliver(
        ctx.publisher.as_ref(),
        ctx.dead_letter.as_ref(),
        action,
        &ctx.retry,
        ctx.clock.as_ref(),
    )
    .await;
    ctx.metrics
        .publish_retries(u64::from(outcome.attempts().saturating_sub(1)));
    if !outcome.is_delivered() {
        ctx.metrics.dead_lettered();
    }
    ctx.store.settle_action(learner_id, action.action_id());
    outcome.is_delivered()
}

async fn redeliver_pending(ctx: &LaneContext, lane: usize, state: &LearnerState) {
    let pending = state.pending_actions().to_vec();
    warn!(
        lane,
        learner_id = %state.learner_id(),
        count = pending.len(),
        "Delivering actions left pending by an interrupted run"
    );
    for action in &pending {
        settle(ctx, state.learner_id(), action).await;
    }
}
