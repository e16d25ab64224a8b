//! Engine behaviour through the public API: direct dispatch, decisions,
//! delivery failures, concurrency and lifecycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pathway_core::{
    ActionPayload, ActionRouter, ActionType, BaselineComplete, CourseworkAnalyzed,
    DifficultyLevel, DispatchOutcome, EngineConfig, EngineState, Error, Event, EventPayload,
    InMemoryDeadLetter, InMemoryPublisher, LearnerId, ManualClock, OrchestrationEngine,
    OrchestratorConfig, PublishError, RetryPolicy, SelAlert, SlpUpdated,
};

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn baseline(learner: &str, sequence: u64, band: i8) -> Event {
    Event::new(
        learner,
        sequence,
        t0(),
        EventPayload::BaselineComplete(BaselineComplete {
            score_band: band,
            confidence: None,
        }),
    )
    .unwrap()
}

fn alert(learner: &str, sequence: u64) -> Event {
    Event::new(learner, sequence, t0(), EventPayload::SelAlert(SelAlert::default())).unwrap()
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(4), 3)
}

struct Harness {
    engine: Arc<OrchestrationEngine>,
    publisher: Arc<InMemoryPublisher>,
    dead_letter: Arc<InMemoryDeadLetter>,
    clock: Arc<ManualClock>,
}

async fn start(config: OrchestratorConfig) -> Harness {
    let publisher = Arc::new(InMemoryPublisher::new());
    let dead_letter = Arc::new(InMemoryDeadLetter::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = OrchestrationEngine::builder(config.with_delivery(fast_retries()), publisher.clone())
        .dead_letter(dead_letter.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    engine.initialize().await.unwrap();

    Harness {
        engine: Arc::new(engine),
        publisher,
        dead_letter,
        clock,
    }
}

#[tokio::test]
async fn baseline_one_band_above_suggests_elementary() {
    let h = start(OrchestratorConfig::default()).await;

    let report = h.engine.dispatch(baseline("L1", 1, 1)).await.unwrap();

    let actions = report.actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action_type(), ActionType::LevelSuggested);
    assert_eq!(actions[0].suggested_level(), Some(DifficultyLevel::Elementary));
    assert_eq!(h.publisher.published().await, actions.to_vec());

    let state = h.engine.learner(&LearnerId::from("L1")).unwrap();
    assert_eq!(state.current_level(), DifficultyLevel::Elementary);
    assert_eq!(
        state.cooldown_until(),
        Some(t0() + chrono::Duration::minutes(10))
    );

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn third_alert_triggers_single_game_break() {
    let notifications = Arc::new(InMemoryPublisher::new());
    let games = Arc::new(InMemoryPublisher::new());
    let router = Arc::new(ActionRouter::new(notifications.clone(), games.clone()));
    let engine = OrchestrationEngine::builder(OrchestratorConfig::default(), router)
        .build()
        .unwrap();
    engine.initialize().await.unwrap();

    let mut emitted = Vec::new();
    for sequence in 1..=3 {
        let report = engine.dispatch(alert("L2", sequence)).await.unwrap();
        emitted.extend(report.actions().to_vec());
    }

    assert_eq!(emitted.len(), 1);
    assert_eq!(
        emitted[0].payload(),
        &ActionPayload::GameBreak(pathway_core::GameBreak { streak: 3 })
    );
    assert_eq!(games.published().await.len(), 1);
    assert!(notifications.published().await.is_empty());
    assert_eq!(
        engine.learner(&"L2".into()).unwrap().sel_alert_streak(),
        0
    );

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn lower_sequence_is_a_no_op() {
    let h = start(OrchestratorConfig::default()).await;
    h.engine.dispatch(alert("L3", 5)).await.unwrap();
    let before = h.engine.learner(&"L3".into()).unwrap();

    let report = h.engine.dispatch(baseline("L3", 3, 1)).await.unwrap();

    assert_eq!(report.outcome, DispatchOutcome::Duplicate);
    assert!(h.publisher.published().await.is_empty());
    assert_eq!(h.engine.learner(&"L3".into()).unwrap(), before);
    assert_eq!(h.engine.status().await.counters.duplicates, 1);

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn exhausted_delivery_is_dead_lettered_without_rollback() {
    let h = start(OrchestratorConfig::default()).await;
    h.publisher
        .fail_always(PublishError::Retryable("notification service down".into()))
        .await;

    let report = h.engine.dispatch(baseline("L4", 1, 1)).await.unwrap();

    match &report.outcome {
        DispatchOutcome::Processed {
            actions,
            dead_lettered,
        } => {
            assert_eq!(actions.len(), 1);
            assert_eq!(*dead_lettered, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let entries = h.dead_letter.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 3);
    assert_eq!(entries[0].action, report.actions()[0]);

    // The decision stands even though nobody heard about it.
    assert_eq!(
        h.engine.learner(&"L4".into()).unwrap().current_level(),
        DifficultyLevel::Elementary
    );

    let counters = h.engine.status().await.counters;
    assert_eq!(counters.dead_lettered, 1);
    assert_eq!(counters.publish_retries, 2);
    assert_eq!(counters.actions_emitted, 1);

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn policy_error_is_handled_and_leaves_state() {
    let h = start(OrchestratorConfig::default()).await;
    let bad = Event::new(
        "L5",
        1,
        t0(),
        EventPayload::CourseworkAnalyzed(CourseworkAnalyzed { score: 7.0 }),
    )
    .unwrap();

    let report = h.engine.dispatch(bad).await.unwrap();

    assert!(matches!(
        report.outcome,
        DispatchOutcome::HandledWithError { .. }
    ));
    assert_eq!(
        h.engine.learner(&"L5".into()).unwrap().last_event_sequence(),
        0
    );
    assert_eq!(h.engine.status().await.counters.policy_errors, 1);

    h.engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_qualifying_events_yield_one_suggestion() {
    let h = start(OrchestratorConfig::default()).await;

    let mut tasks = Vec::new();
    for sequence in 1..=32 {
        let engine = Arc::clone(&h.engine);
        tasks.push(tokio::spawn(async move {
            engine.dispatch(baseline("L6", sequence, 1)).await.unwrap()
        }));
    }
    let mut suggestions = 0;
    for task in tasks {
        suggestions += task.await.unwrap().actions().len();
    }

    assert_eq!(suggestions, 1);
    assert_eq!(h.publisher.published().await.len(), 1);

    h.engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn learners_do_not_share_cooldowns() {
    let h = start(OrchestratorConfig::default()).await;

    let mut tasks = Vec::new();
    for n in 0..16 {
        let engine = Arc::clone(&h.engine);
        tasks.push(tokio::spawn(async move {
            engine
                .dispatch(baseline(&format!("learner-{n}"), 1, 1))
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().actions().len(), 1);
    }

    let status = h.engine.status().await;
    assert_eq!(status.learners_tracked, 16);
    assert_eq!(status.counters.actions_emitted, 16);

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn levels_clamp_at_advanced() {
    let h = start(OrchestratorConfig::default()).await;

    let mut suggested = Vec::new();
    for sequence in 1..=8 {
        let report = h.engine.dispatch(baseline("L7", sequence, 1)).await.unwrap();
        suggested.extend(report.actions().iter().filter_map(|a| a.suggested_level()));
        h.clock.advance(chrono::Duration::minutes(11));
    }

    assert_eq!(
        suggested,
        vec![
            DifficultyLevel::Elementary,
            DifficultyLevel::Intermediate,
            DifficultyLevel::Proficient,
            DifficultyLevel::Advanced,
        ]
    );
    assert_eq!(
        h.engine.learner(&"L7".into()).unwrap().current_level(),
        DifficultyLevel::Advanced
    );

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn plan_update_moves_level_silently() {
    let h = start(OrchestratorConfig::default()).await;
    let plan = Event::new(
        "L8",
        1,
        t0(),
        EventPayload::SlpUpdated(SlpUpdated {
            plan_id: Some("slp-1".into()),
            target_level: Some(DifficultyLevel::Proficient),
        }),
    )
    .unwrap();

    let report = h.engine.dispatch(plan).await.unwrap();

    assert!(report.actions().is_empty());
    assert_eq!(
        h.engine.learner(&"L8".into()).unwrap().current_level(),
        DifficultyLevel::Proficient
    );

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn identical_inputs_give_identical_actions() {
    let events: Vec<Event> = (1..=6)
        .map(|sequence| {
            if sequence % 2 == 0 {
                alert("L9", sequence)
            } else {
                baseline("L9", sequence, 1)
            }
        })
        .collect();

    let mut runs = Vec::new();
    for _ in 0..2 {
        let h = start(OrchestratorConfig::default()).await;
        let mut actions = Vec::new();
        for event in &events {
            actions.extend(h.engine.dispatch(event.clone()).await.unwrap().actions().to_vec());
            h.clock.advance(chrono::Duration::minutes(4));
        }
        h.engine.shutdown().await.unwrap();
        runs.push(serde_json::to_string(&actions).unwrap());
    }

    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn snapshot_restore_keeps_dedup_and_levels() {
    let h = start(OrchestratorConfig::default()).await;
    h.engine.dispatch(baseline("L10", 1, 1)).await.unwrap();
    h.engine.shutdown().await.unwrap();

    let snapshot = h.engine.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    snapshot.write_to(&path).unwrap();
    let restored = pathway_core::StateSnapshot::read_from(&path).unwrap();

    let publisher = Arc::new(InMemoryPublisher::new());
    let engine = OrchestrationEngine::builder(OrchestratorConfig::default(), publisher.clone())
        .snapshot(restored)
        .build()
        .unwrap();
    engine.initialize().await.unwrap();

    let replay = engine.dispatch(baseline("L10", 1, 1)).await.unwrap();
    assert_eq!(replay.outcome, DispatchOutcome::Duplicate);
    assert_eq!(
        engine.learner(&"L10".into()).unwrap().current_level(),
        DifficultyLevel::Elementary
    );
    assert!(publisher.published().await.is_empty());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn idle_learners_are_swept() {
    let config = OrchestratorConfig::default().with_state(
        pathway_core::StateConfig::default()
            .with_idle_ttl(Duration::from_secs(3600))
            .with_sweep_interval(Duration::from_millis(10)),
    );
    let h = start(config).await;
    h.engine.dispatch(alert("L11", 1)).await.unwrap();
    assert_eq!(h.engine.status().await.learners_tracked, 1);

    h.clock.advance(chrono::Duration::hours(2));
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.engine.status().await.learners_tracked > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("idle learner should be evicted");

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn lifecycle_misuse_is_reported() {
    let engine = OrchestrationEngine::builder(
        OrchestratorConfig::default().with_engine(EngineConfig::default().with_lanes(2)),
        Arc::new(InMemoryPublisher::new()),
    )
    .build()
    .unwrap();

    assert_eq!(engine.state().await, EngineState::Uninitialized);
    assert!(matches!(
        engine.dispatch(alert("L12", 1)).await,
        Err(Error::Engine(pathway_core::EngineError::NotReady { .. }))
    ));

    engine.initialize().await.unwrap();
    engine.shutdown().await.unwrap();

    assert!(matches!(
        engine.dispatch(alert("L12", 1)).await,
        Err(Error::Engine(pathway_core::EngineError::Stopped))
    ));
    assert_eq!(engine.status().await.state, EngineState::Stopped);
}
