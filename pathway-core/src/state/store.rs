//! Sharded in-memory learner store.
//!
//! Learners are spread over shards with [`lane_for`], the same function the
//! engine uses to pick a lane, so each lane is the only writer of its shard.
//! Shard locks are held only for the in-memory lookup or replace, never
//! across an await.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::learner::LearnerState;
use super::snapshot::StateSnapshot;
use crate::model::{ActionId, LearnerId};

/// Map a learner to one of `n` lanes (or shards).
#[must_use]
pub fn lane_for(learner_id: &LearnerId, n: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    learner_id.as_str().hash(&mut hasher);
    (hasher.finish() as usize) % n.max(1)
}

type Shard = HashMap<LearnerId, LearnerState>;

pub struct LearnerStateStore {
    shards: Vec<Mutex<Shard>>,
    recent_capacity: usize,
}

impl LearnerStateStore {
    /// Create a store with `shard_count` shards, whose new learners keep
    /// `recent_capacity` recent events.
    #[must_use]
    pub fn new(shard_count: usize, recent_capacity: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards,
            recent_capacity,
        }
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, learner_id: &LearnerId) -> MutexGuard<'_, Shard> {
        let idx = lane_for(learner_id, self.shards.len());
        self.shards[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state for a learner, creating a BEGINNER state on first sight.
    pub fn get_or_create(&self, learner_id: &LearnerId) -> LearnerState {
        let mut shard = self.shard(learner_id);
        shard
            .entry(learner_id.clone())
            .or_insert_with(|| {
                debug!(learner_id = %learner_id, "Creating learner state");
                LearnerState::new(learner_id.clone(), self.recent_capacity)
            })
            .clone()
    }

    /// Atomically replace a learner's state.
    pub fn commit(&self, learner_id: &LearnerId, state: LearnerState) {
        self.shard(learner_id).insert(learner_id.clone(), state);
    }

    /// Mark a pending action of a learner as settled. Returns whether the
    /// learner is still tracked and the action was pending.
    pub fn settle_action(&self, learner_id: &LearnerId, action_id: ActionId) -> bool {
        self.shard(learner_id)
            .get_mut(learner_id)
            .is_some_and(|state| state.settle_action(action_id))
    }

    /// Read-only copy of a learner's state.
    #[must_use]
    pub fn get(&self, learner_id: &LearnerId) -> Option<LearnerState> {
        self.shard(learner_id).get(learner_id).cloned()
    }

    /// Drop a learner's state.
    pub fn remove(&self, learner_id: &LearnerId) -> Option<LearnerState> {
        self.shard(learner_id).remove(learner_id)
    }

    /// Number of learners tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove learners whose last event is at least `ttl` before `now`.
    /// Learners that never had an event applied count as idle. Learners with
    /// pending actions are kept.
    ///
    /// Returns the number of learners removed.
    pub fn evict_idle(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let mut evicted = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            let before = shard.len();
            shard.retain(|_, state| {
                !state.pending_actions().is_empty()
                    || state
                        .last_seen()
                        .is_some_and(|seen| now.signed_duration_since(seen) < ttl)
            });
            evicted += before - shard.len();
        }
        evicted
    }

    /// Copy every learner into a snapshot.
    #[must_use]
    pub fn snapshot(&self, taken_at: DateTime<Utc>) -> StateSnapshot {
        let learners = self
            .shards
            .iter()
            .flat_map(|s| {
                s.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        StateSnapshot::new(taken_at, learners)
    }

    /// Load learners from a snapshot, replacing any with the same id.
    ///
    /// Restored learners are re-sharded for this store and their recent
    /// events trimmed to its capacity. Returns the number restored.
    pub fn restore(&self, snapshot: StateSnapshot) -> usize {
        let count = snapshot.learners.len();
        for mut state in snapshot.learners {
            state.set_recent_capacity(self.recent_capacity);
            let learner_id = state.learner_id().clone();
            self.commit(&learner_id, state);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Action, ActionPayload, DifficultyLevel, Event, EventId, EventPayload, GameBreak, SelAlert,
    };

    fn touched(learner: &str, at: DateTime<Utc>) -> LearnerState {
        let mut state = LearnerState::new(learner.into(), 4);
        let event =
            Event::new(learner, 1, at, EventPayload::SelAlert(SelAlert::default())).unwrap();
        state.record(&event, at);
        state
    }

    #[test]
    fn lane_for_is_stable_and_in_range() {
        let id = LearnerId::from("learner-42");
        let lane = lane_for(&id, 8);

        assert!(lane < 8);
        for _ in 0..10 {
            assert_eq!(lane_for(&id, 8), lane);
        }
        assert_eq!(lane_for(&id, 1), 0);
    }

    #[test]
    fn get_or_create_is_lazy_and_sticky() {
        let store = LearnerStateStore::new(4, 10);
        let id = LearnerId::from("l1");

        assert!(store.get(&id).is_none());
        let state = store.get_or_create(&id);
        assert_eq!(state.current_level(), DifficultyLevel::Beginner);
        assert_eq!(store.len(), 1);

        store.commit(&id, state.with_level(DifficultyLevel::Advanced));
        assert_eq!(
            store.get_or_create(&id).current_level(),
            DifficultyLevel::Advanced
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_is_explicit() {
        let store = LearnerStateStore::new(2, 10);
        let id = LearnerId::from("l1");
        store.get_or_create(&id);

        assert!(store.remove(&id).is_some());
        assert!(store.remove(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn evict_idle_keeps_recent_learners() {
        let now = Utc::now();
        let store = LearnerStateStore::new(4, 10);
        store.commit(&"old".into(), touched("old", now - chrono::Duration::hours(3)));
        store.commit(&"fresh".into(), touched("fresh", now - chrono::Duration::minutes(5)));
        store.get_or_create(&"never".into());

        let evicted = store.evict_idle(now, Duration::from_secs(3600));

        assert_eq!(evicted, 2);
        assert!(store.get(&"fresh".into()).is_some());
        assert!(store.get(&"old".into()).is_none());
        assert!(store.get(&"never".into()).is_none());
    }

    #[test]
    fn pending_actions_block_eviction_until_settled() {
        let now = Utc::now();
        let store = LearnerStateStore::new(4, 10);
        let id = LearnerId::from("stale");
        let mut state = touched("stale", now - chrono::Duration::hours(3));
        let action = Action::new(
            id.clone(),
            ActionPayload::GameBreak(GameBreak { streak: 3 }),
            EventId::new(),
            now,
        );
        state.stage_actions(std::slice::from_ref(&action));
        store.commit(&id, state);

        assert_eq!(store.evict_idle(now, Duration::from_secs(3600)), 0);

        assert!(store.settle_action(&id, action.action_id()));
        assert!(!store.settle_action(&"unknown".into(), action.action_id()));
        assert_eq!(store.evict_idle(now, Duration::from_secs(3600)), 1);
    }

    #[test]
    fn snapshot_restores_into_different_shard_count() {
        let now = Utc::now();
        let store = LearnerStateStore::new(4, 10);
        for learner in ["a", "b", "c", "d", "e"] {
            store.commit(&learner.into(), touched(learner, now));
        }
        let snapshot = store.snapshot(now);
        assert_eq!(snapshot.len(), 5);

        let other = LearnerStateStore::new(3, 2);
        assert_eq!(other.restore(snapshot.clone()), 5);
        assert_eq!(other.len(), 5);
        assert_eq!(
            other.get(&"c".into()).unwrap().last_event_sequence(),
            1
        );
        assert_eq!(other.get(&"c".into()).unwrap().recent_events().capacity(), 2);
    }
}
