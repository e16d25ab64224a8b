//! Learner state and its store.

mod learner;
mod snapshot;
mod store;

pub use learner::{EventRecord, LearnerState, RecentEvents};
pub use snapshot::{SNAPSHOT_VERSION, StateSnapshot};
pub use store::{LearnerStateStore, lane_for};
