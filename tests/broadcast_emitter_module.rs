use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stepledger::broadcast::{
    BroadcastError, Broadcaster, EmitRequest, EnvelopeStatus, PublishError, Publisher,
    RetryPolicy,
};
use stepledger::cache::MemoryStatusCache;
use stepledger::shared::logging::read_event_log;
use stepledger::shared::EventLog;
use stepledger::status::{StatusTracker, TaskState};
use stepledger::store::{HistoryStore, MemoryHistoryStore};
use tempfile::tempdir;

/// Fails the first `failures` publishes, then records every payload.
struct FlakyPublisher {
    failures: u32,
    attempts: AtomicU32,
    delivered: Mutex<Vec<(String, Value)>>,
}

impl FlakyPublisher {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn delivered(&self) -> Vec<(String, Value)> {
        self.delivered.lock().expect("lock").clone()
    }
}

impl Publisher for FlakyPublisher {
    fn publish(&self, topic: &str, payload: &Value) -> Result<(), PublishError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(PublishError::Transport {
                topic: topic.to_string(),
                reason: format!("attempt {attempt} refused"),
            });
        }
        self.delivered
            .lock()
            .expect("lock")
            .push((topic.to_string(), payload.clone()));
        Ok(())
    }
}

fn tracker() -> StatusTracker {
    StatusTracker::new(
        Arc::new(MemoryStatusCache::new()),
        Arc::new(MemoryHistoryStore::new()),
    )
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff: Duration::ZERO,
    }
}

#[test]
fn emit_records_then_publishes_envelope_to_instance_topic() {
    let publisher = Arc::new(FlakyPublisher::new(0));
    let broadcaster = Broadcaster::new(tracker(), publisher.clone(), fast_retry(3));

    let envelope = broadcaster
        .emit(
            "h1",
            EmitRequest::new("Getting candidate genes", TaskState::Started)
                .with_progress(10.0)
                .with_next_task("Predicting causal gene"),
        )
        .expect("emit");
    assert_eq!(envelope.status, None);

    let delivered = publisher.delivered();
    assert_eq!(delivered.len(), 1);
    let (topic, payload) = &delivered[0];
    assert_eq!(topic, "hypothesis_h1");
    assert_eq!(payload["hypothesis_id"], "h1");
    assert_eq!(payload["task"], "Getting candidate genes");
    assert_eq!(payload["state"], "started");
    assert_eq!(payload["progress"], 10.0);
    assert_eq!(payload["next_task"], "Predicting causal gene");
    assert!(payload.get("status").is_none());

    let history = broadcaster.tracker().get_history("h1").expect("history");
    assert_eq!(history.len(), 1);
}

#[test]
fn zero_progress_is_derived_from_history() {
    let publisher = Arc::new(FlakyPublisher::new(0));
    let broadcaster = Broadcaster::new(tracker(), publisher.clone(), fast_retry(3));
    broadcaster
        .emit(
            "h1",
            EmitRequest::new("Creating enrich data", TaskState::Started).with_progress(5.0),
        )
        .expect("emit");
    broadcaster
        .emit(
            "h1",
            EmitRequest::new("Predicting causal gene", TaskState::Completed).with_progress(30.0),
        )
        .expect("emit");

    let envelope = broadcaster
        .emit("h1", EmitRequest::new("Getting relevant gene proof", TaskState::Started))
        .expect("emit");
    assert_eq!(envelope.progress, 20.0);
    assert_eq!(envelope.task_history.len(), 1);
    assert_eq!(envelope.task_history[0].task_name, "Predicting causal gene");
}

#[test]
fn enrichment_milestone_is_flagged_and_finalized() {
    let publisher = Arc::new(FlakyPublisher::new(0));
    let broadcaster = Broadcaster::new(tracker(), publisher.clone(), fast_retry(3))
        .with_topic_prefix("run_");

    let envelope = broadcaster
        .emit(
            "h1",
            EmitRequest::new("Creating enrich data", TaskState::Completed)
                .with_progress(75.0)
                .with_details(json!({"rows": 12})),
        )
        .expect("emit");
    assert_eq!(envelope.status, Some(EnvelopeStatus::EnrichmentCompleted));
    assert_eq!(envelope.progress, 80.0);

    let (topic, payload) = &publisher.delivered()[0];
    assert_eq!(topic, "run_h1");
    assert_eq!(payload["status"], "Enrichment_completed");
    assert_eq!(
        broadcaster.tracker().store().find_all("h1").expect("stored").len(),
        1
    );
}

#[test]
fn failure_envelope_carries_error() {
    let publisher = Arc::new(FlakyPublisher::new(0));
    let broadcaster = Broadcaster::new(tracker(), publisher.clone(), fast_retry(3));
    let envelope = broadcaster
        .emit(
            "h1",
            EmitRequest::new("Querying variant data", TaskState::Failed)
                .with_progress(50.0)
                .with_error("upstream 503"),
        )
        .expect("emit");
    assert_eq!(envelope.status, Some(EnvelopeStatus::Failed));
    assert_eq!(envelope.error.as_deref(), Some("upstream 503"));
    assert_eq!(publisher.delivered()[0].1["status"], "failed");
}

#[test]
fn transient_failures_are_retried() {
    let temp = tempdir().expect("tempdir");
    let publisher = Arc::new(FlakyPublisher::new(2));
    let broadcaster = Broadcaster::new(
        tracker().with_event_log(EventLog::under_state_root(temp.path())),
        publisher.clone(),
        fast_retry(3),
    );

    broadcaster
        .emit("h1", EmitRequest::new("Getting gene data", TaskState::Started).with_progress(1.0))
        .expect("third attempt succeeds");
    assert_eq!(publisher.attempts(), 3);
    assert_eq!(publisher.delivered().len(), 1);

    let events = read_event_log(&temp.path().join("logs/stepledger.log"));
    let retries = events
        .iter()
        .filter(|event| event["event"] == "broadcast.retry")
        .count();
    assert_eq!(retries, 2);
}

#[test]
fn exhausted_retries_surface_error_but_keep_record() {
    let publisher = Arc::new(FlakyPublisher::new(u32::MAX));
    let broadcaster = Broadcaster::new(tracker(), publisher.clone(), fast_retry(3));

    let err = broadcaster
        .emit("h1", EmitRequest::new("Getting gene data", TaskState::Started).with_progress(1.0))
        .expect_err("all attempts fail");
    match err {
        BroadcastError::PublishFailed {
            topic, attempts, ..
        } => {
            assert_eq!(topic, "hypothesis_h1");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(publisher.attempts(), 3);
    assert_eq!(
        broadcaster.tracker().get_history("h1").expect("history").len(),
        1
    );
}

#[test]
fn invalid_instance_is_rejected_before_publishing() {
    let publisher = Arc::new(FlakyPublisher::new(0));
    let broadcaster = Broadcaster::new(tracker(), publisher.clone(), fast_retry(3));
    let err = broadcaster
        .emit("", EmitRequest::new("Getting gene data", TaskState::Started))
        .expect_err("empty id");
    assert!(matches!(err, BroadcastError::Tracker(_)));
    assert_eq!(publisher.attempts(), 0);
}
