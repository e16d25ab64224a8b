//! Event consumer adapter.
//!
//! The engine reads events through [`Consumer`], which settles them by event
//! id. [`StreamConsumer`] implements it over a `pathway-stream` consumer of
//! raw JSON records, decoding and validating each record on the way in.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use pathway_stream::{EventConsumer, EventLog, Offset, SeekPosition};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::model::{Event, EventId};

/// Events from one poll.
#[derive(Debug, Default)]
pub struct ConsumerBatch {
    /// Valid events, in stream order.
    pub events: Vec<Event>,
    /// Records that failed validation. They never reach the engine and are
    /// settled by the consumer itself.
    pub rejected: usize,
}

impl ConsumerBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.rejected == 0
    }
}

/// A restartable subscription to the event stream.
///
/// Every polled event must be settled with [`Consumer::ack`] once handled or
/// [`Consumer::nack`] to have it delivered again.
///
/// `poll` must be cancel-safe: the engine races it against settlements, and
/// a poll dropped before completing must not lose records.
#[async_trait]
pub trait Consumer: Send {
    /// Poll for up to `max` events, waiting at most `timeout` when none are ready.
    async fn poll(&mut self, max: usize, timeout: Duration) -> Result<ConsumerBatch>;

    async fn ack(&mut self, event_id: &EventId) -> Result<()>;

    async fn nack(&mut self, event_id: &EventId) -> Result<()>;

    /// Move the read position. Unsettled events are forgotten.
    async fn seek(&mut self, position: SeekPosition) -> Result<()>;

    /// Offset a restarted subscription resumes from.
    fn committed_offset(&self) -> Offset;
}

/// [`Consumer`] over a stream of JSON-encoded events.
pub struct StreamConsumer {
    inner: Box<dyn EventConsumer<Vec<u8>>>,
    /// Offsets of delivered, unsettled events. A producer may publish the
    /// same event id twice, so one id can map to several offsets.
    pending: HashMap<EventId, VecDeque<Offset>>,
    /// Rejected records not yet acked on the underlying stream.
    rejects: VecDeque<Offset>,
    rejected_total: u64,
}

impl StreamConsumer {
    pub fn new(inner: Box<dyn EventConsumer<Vec<u8>>>) -> Self {
        Self {
            inner,
            pending: HashMap::new(),
            rejects: VecDeque::new(),
            rejected_total: 0,
        }
    }

    /// Subscribe to `log` as consumer group `group`.
    pub async fn subscribe(log: &dyn EventLog<Vec<u8>>, group: &str) -> Result<Self> {
        Ok(Self::new(log.consumer(group).await?))
    }

    /// Records rejected over the lifetime of this consumer.
    #[must_use]
    pub fn rejected_total(&self) -> u64 {
        self.rejected_total
    }

    #[must_use]
    pub fn group(&self) -> &str {
        self.inner.group()
    }

    fn take_offset(&mut self, event_id: &EventId) -> Option<Offset> {
        let offsets = self.pending.get_mut(event_id)?;
        let offset = offsets.pop_front();
        if offsets.is_empty() {
            self.pending.remove(event_id);
        }
        offset
    }

    /// Ack rejected records on the underlying stream.
    ///
    /// Each offset leaves the queue before its ack is awaited, so a dropped
    /// call never acks the same offset twice.
    async fn settle_rejects(&mut self) -> Result<()> {
        while let Some(offset) = self.rejects.pop_front() {
            self.inner.ack(offset).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Consumer for StreamConsumer {
    async fn poll(&mut self, max: usize, timeout: Duration) -> Result<ConsumerBatch> {
        self.settle_rejects().await?;

        // Nothing below awaits, so records taken here always reach the caller.
        let records = self.inner.poll(max, timeout).await?;
        let mut batch = ConsumerBatch::default();

        for (offset, bytes) in records {
            match Event::from_json(&bytes) {
                Ok(event) => {
                    trace!(offset, event_id = %event.event_id(), "Decoded event");
                    self.pending
                        .entry(event.event_id())
                        .or_default()
                        .push_back(offset);
                    batch.events.push(event);
                }
                Err(e) => {
                    warn!(group = %self.inner.group(), offset, error = %e, "Rejecting invalid event");
                    self.rejects.push_back(offset);
                    batch.rejected += 1;
                    self.rejected_total += 1;
                }
            }
        }

        Ok(batch)
    }

    async fn ack(&mut self, event_id: &EventId) -> Result<()> {
        self.settle_rejects().await?;
        match self.take_offset(event_id) {
            Some(offset) => Ok(self.inner.ack(offset).await?),
            None => {
                debug!(%event_id, "Ack for event not in flight");
                Ok(())
            }
        }
    }

    async fn nack(&mut self, event_id: &EventId) -> Result<()> {
        self.settle_rejects().await?;
        match self.take_offset(event_id) {
            Some(offset) => Ok(self.inner.nack(offset).await?),
            None => {
                debug!(%event_id, "Nack for event not in flight");
                Ok(())
            }
        }
    }

    async fn seek(&mut self, position: SeekPosition) -> Result<()> {
        self.settle_rejects().await?;
        self.pending.clear();
        Ok(self.inner.seek(position).await?)
    }

    fn committed_offset(&self) -> Offset {
        self.inner.committed_offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventPayload, SelAlert};
    use chrono::Utc;
    use pathway_stream::InMemoryEventLog;

    fn encoded(learner: &str, sequence: u64) -> (Event, Vec<u8>) {
        let event = Event::new(
            learner,
            sequence,
            Utc::now(),
            EventPayload::SelAlert(SelAlert::default()),
        )
        .unwrap();
        let bytes = event.to_json().unwrap();
        (event, bytes)
    }

    #[tokio::test]
    async fn invalid_records_are_settled_and_counted() {
        let log = InMemoryEventLog::<Vec<u8>>::new();
        let (valid, bytes) = encoded("l1", 1);
        log.append(b"{broken".to_vec()).await.unwrap();
        log.append(bytes).await.unwrap();
        log.append(br#"{"event_type":"LOGIN"}"#.to_vec()).await.unwrap();

        let mut consumer = StreamConsumer::subscribe(&log, "engine").await.unwrap();
        let batch = consumer.poll(10, Duration::from_millis(20)).await.unwrap();

        assert_eq!(batch.events, vec![valid.clone()]);
        assert_eq!(batch.rejected, 2);
        assert_eq!(consumer.rejected_total(), 2);

        // Rejects settle with the next call; offset 1 is still in flight.
        consumer.poll(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(consumer.committed_offset(), 1);

        consumer.ack(&valid.event_id()).await.unwrap();
        assert_eq!(consumer.committed_offset(), 3);
    }

    #[tokio::test]
    async fn nack_redelivers_event() {
        let log = InMemoryEventLog::<Vec<u8>>::new();
        let (event, bytes) = encoded("l1", 1);
        log.append(bytes).await.unwrap();

        let mut consumer = StreamConsumer::subscribe(&log, "engine").await.unwrap();
        let first = consumer.poll(10, Duration::from_millis(20)).await.unwrap();
        consumer.nack(&first.events[0].event_id()).await.unwrap();

        let again = consumer.poll(10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(again.events, vec![event]);
    }

    #[tokio::test]
    async fn repeated_event_id_settles_each_copy() {
        let log = InMemoryEventLog::<Vec<u8>>::new();
        let (event, bytes) = encoded("l1", 1);
        log.append(bytes.clone()).await.unwrap();
        log.append(bytes).await.unwrap();

        let mut consumer = StreamConsumer::subscribe(&log, "engine").await.unwrap();
        let batch = consumer.poll(10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(batch.events.len(), 2);

        consumer.ack(&event.event_id()).await.unwrap();
        assert_eq!(consumer.committed_offset(), 1);
        consumer.ack(&event.event_id()).await.unwrap();
        assert_eq!(consumer.committed_offset(), 2);

        // Nothing left in flight; a stray ack is harmless.
        consumer.ack(&event.event_id()).await.unwrap();
    }

    #[tokio::test]
    async fn empty_poll_times_out() {
        let log = InMemoryEventLog::<Vec<u8>>::new();
        let mut consumer = StreamConsumer::subscribe(&log, "engine").await.unwrap();

        let batch = consumer.poll(10, Duration::from_millis(10)).await.unwrap();
        assert!(batch.is_empty());
    }
}
