//! Orchestration engine.
//!
//! The engine ties the consumer, learner store, decision policy and
//! publisher together and owns their lifecycle:
//!
//! ```text
//! UNINITIALIZED -> INITIALIZING -> RUNNING -> DRAINING -> STOPPED
//! ```
//!
//! Work runs on a fixed pool of lanes. Every event for a learner goes to the
//! same lane, so one learner's events are handled strictly in order while
//! different learners proceed in parallel. Stream events reach the lanes via
//! the intake task; [`OrchestrationEngine::dispatch`] sends an event through
//! the same lanes and waits for its report.

mod intake;
mod lane;
mod status;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use status::{DispatchOutcome, DispatchReport, EngineCounters, EngineState, EngineStatus};

use self::intake::run_intake;
use self::lane::{LaneContext, LaneJob, Origin, run_lane};
use self::status::Metrics;
use crate::clock::{Clock, SystemClock};
use crate::config::OrchestratorConfig;
use crate::consumer::Consumer;
use crate::delivery::{ActionPublisher, DeadLetterSink, InMemoryDeadLetter};
use crate::error::{EngineError, Error, Result};
use crate::model::{Event, LearnerId};
use crate::policy::DecisionPolicy;
use crate::state::{LearnerState, LearnerStateStore, SNAPSHOT_VERSION, StateSnapshot, lane_for};

/// Tasks and channels that exist while the engine runs.
struct Runtime {
    lanes: Vec<mpsc::Sender<LaneJob>>,
    lane_handles: Vec<JoinHandle<()>>,
    intake: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

/// Builder for [`OrchestrationEngine`].
pub struct EngineBuilder {
    config: OrchestratorConfig,
    publisher: Arc<dyn ActionPublisher>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    consumer: Option<Box<dyn Consumer>>,
    clock: Option<Arc<dyn Clock>>,
    snapshot: Option<StateSnapshot>,
}

impl EngineBuilder {
    /// Where undeliverable actions go. Defaults to an in-memory sink.
    #[must_use]
    pub fn dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    /// Stream subscription to read events from. Without one, events only
    /// arrive through [`OrchestrationEngine::dispatch`].
    #[must_use]
    pub fn consumer(mut self, consumer: Box<dyn Consumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Time source for decisions. Defaults to the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Learner state to load when the engine initializes.
    #[must_use]
    pub fn snapshot(mut self, snapshot: StateSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn build(self) -> Result<OrchestrationEngine> {
        self.config.validate()?;
        if let Some(snapshot) = &self.snapshot
            && snapshot.version != SNAPSHOT_VERSION
        {
            return Err(Error::UnsupportedSnapshot(snapshot.version));
        }

        Ok(OrchestrationEngine {
            policy: DecisionPolicy::new(self.config.policy.clone()),
            publisher: self.publisher,
            dead_letter: self
                .dead_letter
                .unwrap_or_else(|| Arc::new(InMemoryDeadLetter::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            metrics: Arc::new(Metrics::default()),
            state: RwLock::new(EngineState::Uninitialized),
            store: OnceLock::new(),
            consumer: Mutex::new(self.consumer),
            restore: Mutex::new(self.snapshot),
            runtime: Mutex::new(None),
            config: self.config,
        })
    }
}

/// The stateful, event-driven decision engine.
pub struct OrchestrationEngine {
    config: OrchestratorConfig,
    policy: DecisionPolicy,
    publisher: Arc<dyn ActionPublisher>,
    dead_letter: Arc<dyn DeadLetterSink>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    state: RwLock<EngineState>,
    store: OnceLock<Arc<LearnerStateStore>>,
    /// Held until `initialize` hands it to the intake task.
    consumer: Mutex<Option<Box<dyn Consumer>>>,
    restore: Mutex<Option<StateSnapshot>>,
    /// Lifecycle transitions hold this lock for their whole duration.
    runtime: Mutex<Option<Runtime>>,
}

impl OrchestrationEngine {
    /// Start building an engine that publishes through `publisher`.
    pub fn builder(config: OrchestratorConfig, publisher: Arc<dyn ActionPublisher>) -> EngineBuilder {
        EngineBuilder {
            config,
            publisher,
            dead_letter: None,
            consumer: None,
            clock: None,
            snapshot: None,
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    async fn set_state(&self, next: EngineState) {
        let mut state = self.state.write().await;
        debug!(from = %*state, to = %next, "Engine state change");
        *state = next;
    }

    /// Allocate the store, start the lanes and subscribe to the stream.
    ///
    /// Calling it again while running does nothing. Fails with
    /// [`EngineError::Stopped`] once shutdown has begun.
    pub async fn initialize(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        match self.state().await {
            EngineState::Running => return Ok(()),
            EngineState::Draining | EngineState::Stopped => {
                return Err(EngineError::Stopped.into());
            }
            EngineState::Uninitialized | EngineState::Initializing => {}
        }

        self.set_state(EngineState::Initializing).await;
        info!(lanes = self.config.engine.lanes, "Initializing orchestration engine");

        let mut consumer = self.consumer.lock().await.take();
        if let Some(c) = consumer.as_mut()
            && let Err(e) = c.seek(self.config.consumer.start_position).await
        {
            *self.consumer.lock().await = consumer;
            self.set_state(EngineState::Uninitialized).await;
            return Err(e);
        }

        let store = Arc::clone(self.store.get_or_init(|| {
            Arc::new(LearnerStateStore::new(
                self.config.engine.lanes,
                self.config.policy.recent_events_capacity,
            ))
        }));
        if let Some(snapshot) = self.restore.lock().await.take() {
            let restored = store.restore(snapshot);
            info!(learners = restored, "Restored learner state");
        }

        let ctx = Arc::new(LaneContext {
            store: Arc::clone(&store),
            policy: self.policy.clone(),
            publisher: Arc::clone(&self.publisher),
            dead_letter: Arc::clone(&self.dead_letter),
            clock: Arc::clone(&self.clock),
            retry: self.config.delivery.clone(),
            metrics: Arc::clone(&self.metrics),
        });

        let stop = CancellationToken::new();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let mut lanes = Vec::with_capacity(self.config.engine.lanes);
        let mut lane_handles = Vec::with_capacity(self.config.engine.lanes);
        for lane in 0..self.config.engine.lanes {
            let (tx, rx) = mpsc::channel(self.config.engine.lane_queue_capacity);
            lanes.push(tx);
            lane_handles.push(tokio::spawn(run_lane(
                lane,
                Arc::clone(&ctx),
                rx,
                ack_tx.clone(),
            )));
        }
        drop(ack_tx);

        let intake = consumer.map(|consumer| {
            tokio::spawn(run_intake(
                consumer,
                lanes.clone(),
                ack_rx,
                self.config.consumer.clone(),
                Arc::clone(&self.metrics),
                stop.clone(),
            ))
        });

        let sweeper = self.config.state.idle_ttl.map(|ttl| {
            tokio::spawn(run_sweeper(
                Arc::clone(&store),
                Arc::clone(&self.clock),
                ttl,
                self.config.state.sweep_interval,
                stop.clone(),
            ))
        });

        *runtime = Some(Runtime {
            lanes,
            lane_handles,
            intake,
            sweeper,
            stop,
        });
        self.set_state(EngineState::Running).await;
        info!("Orchestration engine running");
        Ok(())
    }

    /// Process one event through its learner's lane and wait for the result.
    pub async fn dispatch(&self, event: Event) -> Result<DispatchReport> {
        match self.state().await {
            EngineState::Running => {}
            EngineState::Draining | EngineState::Stopped => {
                return Err(EngineError::Stopped.into());
            }
            state => return Err(EngineError::NotReady { state }.into()),
        }

        let lane = lane_for(event.learner_id(), self.config.engine.lanes);
        let sender = {
            let runtime = self.runtime.lock().await;
            match runtime.as_ref() {
                Some(rt) => rt.lanes[lane].clone(),
                None => return Err(EngineError::Stopped.into()),
            }
        };

        let (reply, report) = oneshot::channel();
        sender
            .send(LaneJob {
                event,
                origin: Origin::Direct(reply),
            })
            .await
            .map_err(|_| EngineError::LaneUnavailable { lane })?;

        Ok(report
            .await
            .map_err(|_| EngineError::LaneUnavailable { lane })?)
    }

    /// Stop intake, let lanes finish queued work within the grace period,
    /// then abort whatever is left. Events not acknowledged by then are
    /// redelivered by the stream to the next subscriber.
    pub async fn shutdown(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        match self.state().await {
            EngineState::Stopped => return Ok(()),
            EngineState::Uninitialized => {
                self.set_state(EngineState::Stopped).await;
                return Ok(());
            }
            _ => {}
        }

        self.set_state(EngineState::Draining).await;
        info!("Draining orchestration engine");

        if let Some(rt) = runtime.take() {
            let Runtime {
                lanes,
                lane_handles,
                intake,
                sweeper,
                stop,
            } = rt;

            stop.cancel();
            drop(lanes);

            let mut handles = lane_handles;
            handles.extend(intake);
            handles.extend(sweeper);

            let grace = self.config.engine.shutdown_grace;
            let drained = tokio::time::timeout(grace, async {
                for handle in handles.iter_mut() {
                    let _ = handle.await;
                }
            })
            .await;

            if drained.is_err() {
                warn!(?grace, "Shutdown grace period elapsed, aborting remaining work");
                for handle in &handles {
                    handle.abort();
                }
                for handle in handles {
                    if !handle.is_finished() {
                        let _ = handle.await;
                    }
                }
            }
        }

        self.set_state(EngineState::Stopped).await;
        info!("Orchestration engine stopped");
        Ok(())
    }

    /// Read-only status: lifecycle state, learners tracked and counters.
    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state().await,
            learners_tracked: self.store.get().map_or(0, |s| s.len()),
            counters: self.metrics.counters(),
        }
    }

    /// Copy of one learner's state.
    #[must_use]
    pub fn learner(&self, learner_id: &LearnerId) -> Option<LearnerState> {
        self.store.get()?.get(learner_id)
    }

    /// Remove a learner's state.
    pub fn evict_learner(&self, learner_id: &LearnerId) -> Option<LearnerState> {
        let removed = self.store.get()?.remove(learner_id);
        if removed.is_some() {
            info!(learner_id = %learner_id, "Evicted learner");
        }
        removed
    }

    /// Snapshot every learner's state. Available once initialized, including after shutdown.
    pub async fn snapshot(&self) -> Result<StateSnapshot> {
        match self.store.get() {
            Some(store) => Ok(store.snapshot(self.clock.now())),
            None => Err(EngineError::NotReady {
                state: self.state().await,
            }
            .into()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

async fn run_sweeper(
    store: Arc<LearnerStateStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    interval: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = store.evict_idle(clock.now(), ttl);
                if evicted > 0 {
                    info!(evicted, ?ttl, "Evicted idle learners");
                }
            }
        }
    }
}
