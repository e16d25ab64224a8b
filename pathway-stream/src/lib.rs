//! Offset-tracked event log for pathway.
//!
//! This crate provides the stream plumbing the orchestration engine reads
//! from. It implements a producer/consumer model with independent offset
//! tracking per consumer group and per-record settlement: every delivered
//! record is either acked (processed) or nacked (redeliver), and a group's
//! committed watermark only moves past records that were acked.
//!
//! # Key Types
//!
//! - [`EventLog`] - Trait for appending records and creating consumers
//! - [`EventConsumer`] - Trait for polling, acking and nacking records
//! - [`InMemoryEventLog`] - In-process implementation of EventLog
//! - [`ConsumerConfig`] - Group, batch size and poll timeout for a consumer

pub mod config;
pub mod error;
pub mod memory;
pub mod traits;

// Re-exports
pub use config::ConsumerConfig;
pub use error::{Error, Result};
pub use memory::InMemoryEventLog;
pub use traits::{EventBatch, EventConsumer, EventLog, Offset, SeekPosition};
