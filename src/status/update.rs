use super::error::TrackerError;
use crate::shared::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Started,
    Completed,
    Failed,
    Retrying,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Started => "started",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Retrying => "retrying",
        }
    }

    /// Completed and failed transitions are the only ones that may close a
    /// phase.
    pub fn is_settled(self) -> bool {
        match self {
            TaskState::Completed | TaskState::Failed => true,
            TaskState::Started | TaskState::Retrying => false,
        }
    }
}

impl FromStr for TaskState {
    type Err = TrackerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "started" => Ok(TaskState::Started),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            "retrying" => Ok(TaskState::Retrying),
            _ => Err(TrackerError::UnknownState {
                value: raw.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bound of a reported progress value; NaN fails the range check too.
pub const MAX_PROGRESS: f64 = 100.0;

/// One observed transition of one pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepUpdate {
    pub timestamp: Timestamp,
    #[serde(rename = "task")]
    pub task_name: String,
    pub state: TaskState,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a pipeline step reports for a single transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub task_name: String,
    pub state: TaskState,
    pub progress: f64,
    pub details: Option<Value>,
    pub error: Option<String>,
    pub timestamp: Option<Timestamp>,
}

impl StepReport {
    pub fn new(task_name: impl Into<String>, state: TaskState, progress: f64) -> Self {
        Self {
            task_name: task_name.into(),
            state,
            progress,
            details: None,
            error: None,
            timestamp: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub(crate) fn into_update(self) -> Result<StepUpdate, TrackerError> {
        if !(0.0..=MAX_PROGRESS).contains(&self.progress) {
            return Err(TrackerError::InvalidProgress {
                value: self.progress,
            });
        }
        let error = match self.state {
            TaskState::Failed => self.error.filter(|value| !value.trim().is_empty()),
            TaskState::Started | TaskState::Completed | TaskState::Retrying => None,
        };
        Ok(StepUpdate {
            timestamp: self.timestamp.unwrap_or_else(Timestamp::now),
            task_name: self.task_name,
            state: self.state,
            progress: self.progress,
            details: self.details.filter(|value| !is_empty_payload(value)),
            error,
        })
    }
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Lenient form of [`StepUpdate`] used for the cache's latest pointer, which a
/// crashed or foreign writer may have left incomplete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, rename = "task", skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CachedUpdate {
    pub fn to_step_update(&self) -> Option<StepUpdate> {
        Some(StepUpdate {
            timestamp: self.timestamp?,
            task_name: self.task_name.clone()?,
            state: self.state?,
            progress: self.progress?,
            details: self.details.clone(),
            error: self.error.clone(),
        })
    }

    /// Fills absent fields with the abandoned-instance defaults: the instance
    /// is assumed to have failed at `now` with no progress.
    pub fn patch_abandoned(&mut self, now: Timestamp) -> bool {
        let mut patched = false;
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
            patched = true;
        }
        if self.state.is_none() {
            self.state = Some(TaskState::Failed);
            patched = true;
        }
        if self.progress.is_none() {
            self.progress = Some(0.0);
            patched = true;
        }
        patched
    }
}

impl From<StepUpdate> for CachedUpdate {
    fn from(update: StepUpdate) -> Self {
        Self {
            timestamp: Some(update.timestamp),
            task_name: Some(update.task_name),
            state: Some(update.state),
            progress: Some(update.progress),
            details: update.details,
            error: update.error,
        }
    }
}

impl From<&StepUpdate> for CachedUpdate {
    fn from(update: &StepUpdate) -> Self {
        Self::from(update.clone())
    }
}
