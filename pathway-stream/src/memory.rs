//! In-memory EventLog implementation.
//!
//! Records are kept in memory without persistence. Consumers of the same
//! group share a committed watermark, so a consumer created after a crash of
//! its predecessor resumes from the first record that was never acked and
//! sees every unsettled record again.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::traits::{EventBatch, EventConsumer, EventLog, Offset, SeekPosition};

/// State shared between the log and its consumers.
struct SharedState<E> {
    /// Stored records; a record's offset is its index.
    events: RwLock<Vec<E>>,
    /// Next offset to assign.
    next_offset: AtomicU64,
    /// Committed watermark per consumer group.
    committed: RwLock<HashMap<String, Offset>>,
    /// Wakes pollers waiting for new records.
    notify: Notify,
}

/// In-memory implementation of EventLog.
pub struct InMemoryEventLog<E> {
    shared: Arc<SharedState<E>>,
}

impl<E> InMemoryEventLog<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Create a new in-memory event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SharedState {
                events: RwLock::new(Vec::new()),
                next_offset: AtomicU64::new(0),
                committed: RwLock::new(HashMap::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Get the number of records in the log.
    pub async fn len(&self) -> usize {
        self.shared.events.read().await.len()
    }

    /// Check if the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.shared.events.read().await.is_empty()
    }

    /// Committed watermark of a consumer group (0 for unknown groups).
    pub async fn committed_offset(&self, group: &str) -> Offset {
        self.shared
            .committed
            .read()
            .await
            .get(group)
            .copied()
            .unwrap_or(0)
    }
}

impl<E> Default for InMemoryEventLog<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> EventLog<E> for InMemoryEventLog<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn append(&self, event: E) -> Result<Offset> {
        let offset = {
            let mut events = self.shared.events.write().await;
            events.push(event);
            self.shared.next_offset.fetch_add(1, Ordering::SeqCst)
        };
        self.shared.notify.notify_waiters();
        Ok(offset)
    }

    async fn append_batch(&self, events: Vec<E>) -> Result<Offset> {
        let count = events.len() as u64;
        if count == 0 {
            return Ok(self.high_water_mark().saturating_sub(1));
        }

        let first_offset = {
            let mut stored = self.shared.events.write().await;
            stored.extend(events);
            self.shared.next_offset.fetch_add(count, Ordering::SeqCst)
        };
        self.shared.notify.notify_waiters();
        Ok(first_offset + count - 1)
    }

    async fn consumer(&self, group: &str) -> Result<Box<dyn EventConsumer<E>>> {
        let committed = self
            .shared
            .committed
            .read()
            .await
            .get(group)
            .copied()
            .unwrap_or(0);

        debug!(group, committed, "Creating in-memory consumer");

        Ok(Box::new(InMemoryConsumer {
            group: group.to_string(),
            shared: Arc::clone(&self.shared),
            next_offset: committed,
            committed,
            in_flight: BTreeSet::new(),
            acked: BTreeSet::new(),
            redeliver: BTreeSet::new(),
        }))
    }

    fn high_water_mark(&self) -> Offset {
        self.shared.next_offset.load(Ordering::SeqCst)
    }
}

/// In-memory consumer implementation.
struct InMemoryConsumer<E> {
    group: String,
    shared: Arc<SharedState<E>>,
    /// Next never-delivered offset.
    next_offset: Offset,
    /// Every offset below this one is settled.
    committed: Offset,
    /// Delivered, not yet acked or nacked.
    in_flight: BTreeSet<Offset>,
    /// Acked offsets above the watermark.
    acked: BTreeSet<Offset>,
    /// Nacked offsets waiting to be handed out again.
    redeliver: BTreeSet<Offset>,
}

impl<E> InMemoryConsumer<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Take up to `max_count` ready records, redeliveries first.
    async fn take_ready(&mut self, max_count: usize) -> Vec<(Offset, E)> {
        let events = self.shared.events.read().await;
        let mut ready = Vec::new();

        while ready.len() < max_count {
            let Some(offset) = self.redeliver.pop_first() else {
                break;
            };
            if let Some(event) = events.get(offset as usize) {
                self.in_flight.insert(offset);
                ready.push((offset, event.clone()));
            }
        }

        while ready.len() < max_count && (self.next_offset as usize) < events.len() {
            let offset = self.next_offset;
            self.in_flight.insert(offset);
            ready.push((offset, events[offset as usize].clone()));
            self.next_offset += 1;
        }

        ready
    }

    async fn publish_watermark(&self) {
        self.shared
            .committed
            .write()
            .await
            .insert(self.group.clone(), self.committed);
    }
}

#[async_trait]
impl<E> EventConsumer<E> for InMemoryConsumer<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn poll(&mut self, max_count: usize, timeout: Duration) -> Result<EventBatch<E>> {
        if max_count == 0 {
            return Ok(EventBatch::empty());
        }

        let shared = Arc::clone(&self.shared);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so an append in between is not missed.
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready = self.take_ready(max_count).await;
            if !ready.is_empty() {
                trace!(group = %self.group, count = ready.len(), "Delivering records");
                return Ok(EventBatch::new(ready));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(EventBatch::empty());
            }
        }
    }

    async fn ack(&mut self, offset: Offset) -> Result<()> {
        if !self.in_flight.remove(&offset) {
            return Err(Error::NotInFlight(offset));
        }

        if offset >= self.committed {
            self.acked.insert(offset);
        }

        let before = self.committed;
        while self.acked.remove(&self.committed) {
            self.committed += 1;
        }

        if self.committed != before {
            trace!(group = %self.group, committed = self.committed, "Watermark advanced");
            self.publish_watermark().await;
        }
        Ok(())
    }

    async fn nack(&mut self, offset: Offset) -> Result<()> {
        if !self.in_flight.remove(&offset) {
            return Err(Error::NotInFlight(offset));
        }
        debug!(group = %self.group, offset, "Record returned for redelivery");
        self.redeliver.insert(offset);
        Ok(())
    }

    async fn seek(&mut self, position: SeekPosition) -> Result<()> {
        let high_water_mark = self.shared.next_offset.load(Ordering::SeqCst);

        let target = match position {
            SeekPosition::Beginning => 0,
            SeekPosition::Committed => self.committed,
            SeekPosition::End => high_water_mark,
            SeekPosition::Offset(offset) => {
                if offset > high_water_mark {
                    return Err(Error::OutOfRange {
                        offset,
                        high_water_mark,
                    });
                }
                offset
            }
        };

        self.in_flight.clear();
        self.redeliver.clear();
        self.next_offset = target;

        // Skipping forward settles everything in between.
        if target > self.committed {
            self.committed = target;
            self.acked.retain(|o| *o >= target);
            self.publish_watermark().await;
        }
        Ok(())
    }

    fn committed_offset(&self) -> Offset {
        self.committed
    }

    fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn group(&self) -> &str {
        &self.group
    }
}
