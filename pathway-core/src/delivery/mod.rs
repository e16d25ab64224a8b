//! Action delivery: publishers, retries and the dead-letter sink.

mod dead_letter;
mod publisher;
mod retry;

pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetter};
pub use publisher::{ActionPublisher, ActionRouter, InMemoryPublisher};
pub use retry::{DeliveryOutcome, RetryPolicy, deliver};
