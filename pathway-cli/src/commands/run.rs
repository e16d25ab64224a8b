use crate::config::ConfigLoader;
use crate::publisher::StdoutPublisher;
use anyhow::{Context, Result};
use clap::Args;
use pathway_core::{
    ActionPublisher, DeadLetter, EngineStatus, InMemoryDeadLetter, OrchestrationEngine,
    OrchestratorConfig, StateSnapshot, StreamConsumer,
};
use pathway_stream::{EventLog, InMemoryEventLog, Offset};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How often the replay checks the committed watermark.
const COMMIT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Args)]
pub struct RunArgs {
    /// JSONL file with one event per line
    #[arg(long)]
    pub events: PathBuf,

    /// Config file layered over the user config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// State snapshot to restore from (if present) and write back on exit
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Consumer group name
    #[arg(long)]
    pub group: Option<String>,
}

/// What a replay left behind.
pub struct ReplayReport {
    pub status: EngineStatus,
    pub dead_letters: Vec<DeadLetter>,
    pub snapshot: StateSnapshot,
    /// False when the replay was interrupted before every record committed.
    pub completed: bool,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = ConfigLoader::load(args.config.as_deref())?;
    if let Some(group) = args.group {
        config.consumer = config.consumer.with_group(group);
    }

    let restore = match &args.snapshot {
        Some(path) if path.exists() => Some(
            StateSnapshot::read_from(path)
                .with_context(|| format!("Failed to read snapshot {}", path.display()))?,
        ),
        _ => None,
    };

    let contents = std::fs::read_to_string(&args.events)
        .with_context(|| format!("Failed to read events {}", args.events.display()))?;

    let report = replay(config, &contents, restore, Arc::new(StdoutPublisher::new())).await?;

    for entry in &report.dead_letters {
        println!("{}", serde_json::to_string(entry)?);
    }
    println!("{}", serde_json::to_string_pretty(&report.status)?);

    if let Some(path) = &args.snapshot {
        report
            .snapshot
            .write_to(path)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        info!(path = %path.display(), learners = report.snapshot.len(), "Snapshot written");
    }

    if !report.completed {
        warn!("Replay interrupted before every event was committed");
    }
    Ok(())
}

/// Load every non-blank line into an in-memory log, run the engine until the
/// consumer group has committed all of them (or Ctrl-C), then shut down.
pub async fn replay(
    config: OrchestratorConfig,
    contents: &str,
    restore: Option<StateSnapshot>,
    publisher: Arc<dyn ActionPublisher>,
) -> Result<ReplayReport> {
    let log = InMemoryEventLog::<Vec<u8>>::new();
    let records: Vec<Vec<u8>> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.as_bytes().to_vec())
        .collect();
    if !records.is_empty() {
        log.append_batch(records).await?;
    }
    let target = log.high_water_mark();
    let group = config.consumer.group.clone();
    info!(records = target, group = %group, "Loaded events");

    let dead_letter = Arc::new(InMemoryDeadLetter::new());
    let consumer = StreamConsumer::subscribe(&log, &group).await?;
    let mut builder = OrchestrationEngine::builder(config, publisher)
        .consumer(Box::new(consumer))
        .dead_letter(dead_letter.clone());
    if let Some(snapshot) = restore {
        builder = builder.snapshot(snapshot);
    }
    let engine = builder.build()?;
    engine.initialize().await?;

    let completed = tokio::select! {
        _ = wait_for_commit(&log, &group, target) => true,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            false
        }
    };

    engine.shutdown().await?;

    Ok(ReplayReport {
        status: engine.status().await,
        dead_letters: dead_letter.entries().await,
        snapshot: engine.snapshot().await?,
        completed,
    })
}

async fn wait_for_commit(log: &InMemoryEventLog<Vec<u8>>, group: &str, target: Offset) {
    while log.committed_offset(group).await < target {
        tokio::time::sleep(COMMIT_CHECK_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathway_core::{ConsumerConfig, DifficultyLevel, EngineState, InMemoryPublisher, RetryPolicy};

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_consumer(ConsumerConfig::default().with_poll_timeout(Duration::from_millis(20)))
            .with_delivery(RetryPolicy::new(
                Duration::from_millis(1),
                Duration::from_millis(2),
                2,
            ))
    }

    fn line(event_id: &str, learner: &str, sequence: u64, event_type: &str, payload: &str) -> String {
        format!(
            r#"{{"event_id":"{event_id}","learner_id":"{learner}","event_type":"{event_type}","payload":{payload},"occurred_at":"2026-03-01T10:00:00Z","sequence":{sequence}}}"#
        )
    }

    fn sample() -> String {
        [
            line(
                "0190f3a4-0000-7000-8000-000000000001",
                "ana",
                1,
                "BASELINE_COMPLETE",
                r#"{"score_band":1}"#,
            ),
            String::new(),
            "garbage".to_string(),
            line(
                "0190f3a4-0000-7000-8000-000000000002",
                "ben",
                1,
                "SEL_ALERT",
                r#"{"severity":"HIGH"}"#,
            ),
        ]
        .join("\n")
    }

    #[tokio::test]
    async fn replay_processes_every_line_and_stops() {
        let publisher = Arc::new(InMemoryPublisher::new());

        let report = replay(config(), &sample(), None, publisher.clone()).await.unwrap();

        assert!(report.completed);
        assert_eq!(report.status.state, EngineState::Stopped);
        assert_eq!(report.status.counters.events_processed, 2);
        assert_eq!(report.status.counters.validation_errors, 1);
        assert_eq!(publisher.published().await.len(), 1);
        assert!(report.dead_letters.is_empty());
        assert_eq!(report.snapshot.len(), 2);
    }

    #[tokio::test]
    async fn empty_file_completes_immediately() {
        let report = replay(config(), "\n\n", None, Arc::new(InMemoryPublisher::new()))
            .await
            .unwrap();

        assert!(report.completed);
        assert_eq!(report.status.counters.events_processed, 0);
        assert!(report.snapshot.is_empty());
    }

    #[tokio::test]
    async fn restored_snapshot_suppresses_replayed_events() {
        let first = replay(config(), &sample(), None, Arc::new(InMemoryPublisher::new()))
            .await
            .unwrap();
        let level = first
            .snapshot
            .learners
            .iter()
            .find(|s| s.learner_id().as_str() == "ana")
            .map(|s| s.current_level());
        assert_eq!(level, Some(DifficultyLevel::Elementary));

        let publisher = Arc::new(InMemoryPublisher::new());
        let second = replay(config(), &sample(), Some(first.snapshot), publisher.clone())
            .await
            .unwrap();

        assert_eq!(second.status.counters.duplicates, 2);
        assert_eq!(second.status.counters.events_processed, 0);
        assert!(publisher.published().await.is_empty());
    }

    #[tokio::test]
    async fn failing_publisher_reports_dead_letters() {
        let publisher = Arc::new(InMemoryPublisher::new());
        publisher
            .fail_always(pathway_core::PublishError::Permanent("rejected".into()))
            .await;

        let report = replay(config(), &sample(), None, publisher).await.unwrap();

        assert!(report.completed);
        assert_eq!(report.dead_letters.len(), 1);
        assert_eq!(report.status.counters.dead_lettered, 1);
    }
}
