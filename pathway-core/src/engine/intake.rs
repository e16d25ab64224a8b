//! Stream intake task.
//!
//! Owns the consumer: polls batches, routes each event to its learner's
//! lane, and acks events as lanes finish them. Runs until the stop token is
//! cancelled, then keeps settling acks until every lane has finished.

use std::sync::Arc;

use pathway_stream::ConsumerConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::lane::{LaneJob, Origin};
use super::status::Metrics;
use crate::consumer::Consumer;
use crate::model::{Event, EventId};
use crate::state::lane_for;

pub(crate) async fn run_intake(
    mut consumer: Box<dyn Consumer>,
    lanes: Vec<mpsc::Sender<LaneJob>>,
    mut acks: mpsc::UnboundedReceiver<EventId>,
    config: ConsumerConfig,
    metrics: Arc<Metrics>,
    stop: CancellationToken,
) {
    info!(group = %config.group, lanes = lanes.len(), "Intake starting");

    loop {
        tokio::select! {
            biased;

            Some(event_id) = acks.recv() => {
                settle(consumer.as_mut(), &event_id).await;
            }

            _ = stop.cancelled() => {
                info!(group = %config.group, "Intake received shutdown signal");
                break;
            }

            result = consumer.poll(config.batch_size, config.poll_timeout) => {
                match result {
                    Ok(batch) => {
                        if batch.rejected > 0 {
                            metrics.validation_errors(batch.rejected as u64);
                        }
                        if batch.events.is_empty() {
                            trace!(group = %config.group, "Empty batch, continuing");
                            continue;
                        }

                        debug!(group = %config.group, count = batch.events.len(), "Routing batch");
                        if !route(consumer.as_mut(), &lanes, batch.events, &stop).await {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(group = %config.group, error = %e, "Poll failed");
                        tokio::select! {
                            _ = stop.cancelled() => break,
                            _ = tokio::time::sleep(config.error_backoff) => {}
                        }
                    }
                }
            }
        }
    }

    // Lanes finish what they already hold; their acks still arrive here.
    drop(lanes);
    while let Some(event_id) = acks.recv().await {
        settle(consumer.as_mut(), &event_id).await;
    }

    info!(
        group = %config.group,
        committed = consumer.committed_offset(),
        "Intake stopped"
    );
}

/// Send each event to its lane. On stop, or if a lane is gone, the event
/// and the rest of the batch are nacked and `false` is returned.
async fn route(
    consumer: &mut dyn Consumer,
    lanes: &[mpsc::Sender<LaneJob>],
    events: Vec<Event>,
    stop: &CancellationToken,
) -> bool {
    let mut events = events.into_iter();

    while let Some(event) = events.next() {
        let lane = lane_for(event.learner_id(), lanes.len());
        let event_id = event.event_id();
        let job = LaneJob {
            event,
            origin: Origin::Stream,
        };

        let sent = tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            result = lanes[lane].send(job) => result.is_ok(),
        };

        if !sent {
            warn!(lane, "Could not route batch, returning unrouted events");
            unsettle(consumer, &event_id).await;
            for rest in events {
                unsettle(consumer, &rest.event_id()).await;
            }
            return false;
        }
    }

    true
}

async fn settle(consumer: &mut dyn Consumer, event_id: &EventId) {
    if let Err(e) = consumer.ack(event_id).await {
        error!(%event_id, error = %e, "Failed to ack event");
    }
}

async fn unsettle(consumer: &mut dyn Consumer, event_id: &EventId) {
    if let Err(e) = consumer.nack(event_id).await {
        error!(%event_id, error = %e, "Failed to nack event");
    }
}
