//! Core traits for event log operations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Offset of a record within the log.
pub type Offset = u64;

/// Position to seek to when (re)starting a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekPosition {
    /// Start from the beginning of the log.
    Beginning,
    /// Resume from the group's committed watermark.
    Committed,
    /// Start from the end (new records only).
    End,
    /// Start from a specific offset.
    Offset(Offset),
}

impl Default for SeekPosition {
    fn default() -> Self {
        Self::Committed
    }
}

/// A batch of records returned from polling, in delivery order.
#[derive(Debug)]
pub struct EventBatch<E> {
    /// The records in this batch, paired with their offsets.
    pub events: Vec<(Offset, E)>,
}

impl<E> EventBatch<E> {
    /// Create a batch from offset/record pairs.
    #[must_use]
    pub fn new(events: Vec<(Offset, E)>) -> Self {
        Self { events }
    }

    /// Create an empty batch.
    #[must_use]
    pub fn empty() -> Self {
        Self { events: Vec::new() }
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Offset of the first record.
    #[must_use]
    pub fn first_offset(&self) -> Option<Offset> {
        self.events.first().map(|(o, _)| *o)
    }

    /// Offset of the last record.
    #[must_use]
    pub fn last_offset(&self) -> Option<Offset> {
        self.events.last().map(|(o, _)| *o)
    }
}

impl<E> IntoIterator for EventBatch<E> {
    type Item = (Offset, E);
    type IntoIter = std::vec::IntoIter<(Offset, E)>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

/// Trait for appending records and creating consumers.
#[async_trait]
pub trait EventLog<E>: Send + Sync {
    /// Append a record, returning its offset.
    async fn append(&self, event: E) -> crate::Result<Offset>;

    /// Append several records, returning the offset of the last one.
    async fn append_batch(&self, events: Vec<E>) -> crate::Result<Offset>;

    /// Create a consumer for a group, positioned at the group's committed watermark.
    async fn consumer(&self, group: &str) -> crate::Result<Box<dyn EventConsumer<E>>>;

    /// Offset that the next appended record will receive.
    fn high_water_mark(&self) -> Offset;
}

/// Trait for polling records with per-record settlement.
///
/// Every polled record stays in flight until it is acked or nacked. Acked
/// records advance the group's committed watermark once every earlier record
/// is acked too; nacked records are handed out again by a later poll.
#[async_trait]
pub trait EventConsumer<E>: Send {
    /// Poll for up to `max_count` records, waiting at most `timeout` when none are ready.
    async fn poll(&mut self, max_count: usize, timeout: Duration) -> crate::Result<EventBatch<E>>;

    /// Mark an in-flight record as processed.
    async fn ack(&mut self, offset: Offset) -> crate::Result<()>;

    /// Return an in-flight record for redelivery.
    async fn nack(&mut self, offset: Offset) -> crate::Result<()>;

    /// Move the read position.
    async fn seek(&mut self, position: SeekPosition) -> crate::Result<()>;

    /// The offset a restarted consumer of this group resumes from.
    fn committed_offset(&self) -> Offset;

    /// Number of records delivered but not yet settled.
    fn in_flight(&self) -> usize;

    /// The consumer group name.
    fn group(&self) -> &str;
}
