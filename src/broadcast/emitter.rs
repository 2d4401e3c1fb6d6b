use super::envelope::UpdateEnvelope;
use super::{topic_for, BroadcastError, Publisher, DEFAULT_TOPIC_PREFIX};
use crate::status::{trailing_completed, StatusTracker, StepReport, TaskState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmitRequest {
    pub task_name: String,
    pub state: TaskState,
    /// Zero means "derive from the current history".
    pub progress: f64,
    pub details: Option<Value>,
    pub next_task: Option<String>,
    pub error: Option<String>,
}

impl EmitRequest {
    pub fn new(task_name: impl Into<String>, state: TaskState) -> Self {
        Self {
            task_name: task_name.into(),
            state,
            progress: 0.0,
            details: None,
            next_task: None,
            error: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_next_task(mut self, next_task: impl Into<String>) -> Self {
        self.next_task = Some(next_task.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Records a step transition and fans the resulting envelope out to the
/// instance's topic.
#[derive(Clone)]
pub struct Broadcaster {
    tracker: StatusTracker,
    publisher: Arc<dyn Publisher>,
    retry: RetryPolicy,
    topic_prefix: String,
}

impl Broadcaster {
    pub fn new(tracker: StatusTracker, publisher: Arc<dyn Publisher>, retry: RetryPolicy) -> Self {
        Self {
            tracker,
            publisher,
            retry,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn topic(&self, instance_id: &str) -> String {
        topic_for(&self.topic_prefix, instance_id)
    }

    /// The record side effect commits before publishing; a
    /// [`BroadcastError::PublishFailed`] therefore never means the update was
    /// lost, only that subscribers missed it.
    pub fn emit(
        &self,
        instance_id: &str,
        request: EmitRequest,
    ) -> Result<UpdateEnvelope, BroadcastError> {
        let history = self.tracker.get_history(instance_id)?;
        let window = trailing_completed(&history);
        let progress = if request.progress == 0.0 {
            self.tracker.calculate_progress(&history)
        } else {
            request.progress
        };

        let mut report = StepReport::new(request.task_name.clone(), request.state, progress);
        report.details = request.details;
        report.error = request.error.clone();
        self.tracker.record(instance_id, report)?;

        let envelope = UpdateEnvelope::build(
            instance_id,
            &request.task_name,
            request.state,
            progress,
            window,
            request.next_task,
            request.error,
        );
        let payload = serde_json::to_value(&envelope)?;
        self.publish_with_retry(&self.topic(instance_id), &payload)?;
        Ok(envelope)
    }

    fn publish_with_retry(&self, topic: &str, payload: &Value) -> Result<(), BroadcastError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.publisher.publish(topic, payload) {
                Ok(()) => {
                    self.tracker.log_info(
                        "broadcast.emit",
                        &[("topic", json!(topic)), ("attempt", json!(attempt))],
                    );
                    return Ok(());
                }
                Err(source) if attempt >= max_attempts => {
                    if let Some(log) = self.tracker.event_log() {
                        log.error(
                            "broadcast.failed",
                            &[
                                ("topic", json!(topic)),
                                ("attempts", json!(attempt)),
                                ("error", json!(source.to_string())),
                            ],
                        );
                    }
                    return Err(BroadcastError::PublishFailed {
                        topic: topic.to_string(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    self.tracker.log_warn(
                        "broadcast.retry",
                        &[
                            ("topic", json!(topic)),
                            ("attempt", json!(attempt)),
                            ("error", json!(source.to_string())),
                        ],
                    );
                    thread::sleep(self.retry.backoff);
                    attempt += 1;
                }
            }
        }
    }
}
