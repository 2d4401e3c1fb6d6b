use super::error::TrackerError;
use super::markers::{milestone_for, Milestone};
use super::progress::calculate_progress;
use super::tracker::StatusTracker;
use super::update::{StepUpdate, TaskState};
use crate::shared::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Pending,
    Completed,
    Failed,
}

/// Point-in-time status sent to a subscriber when it joins an instance's
/// topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub hypothesis_id: String,
    pub timestamp: Timestamp,
    pub status: SnapshotStatus,
    pub progress: f64,
    pub task_history: Vec<StepUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusTracker {
    pub fn snapshot(&self, instance_id: &str) -> Result<StatusSnapshot, TrackerError> {
        let history = self.get_history(instance_id)?;
        let current = self.current_state(instance_id)?;

        let completed = history.iter().any(|update| {
            milestone_for(&update.task_name, update.state, update.progress)
                == Some(Milestone::HypothesisCompleted)
        });
        let failed = current
            .as_ref()
            .map(|update| update.state == TaskState::Failed)
            .unwrap_or(false);

        let (status, progress) = if completed {
            (
                SnapshotStatus::Completed,
                Milestone::HypothesisCompleted.pinned_progress(),
            )
        } else if failed {
            (SnapshotStatus::Failed, calculate_progress(&history))
        } else {
            (SnapshotStatus::Pending, calculate_progress(&history))
        };

        Ok(StatusSnapshot {
            hypothesis_id: instance_id.to_string(),
            timestamp: Timestamp::now(),
            status,
            progress,
            current_task: current.as_ref().map(|update| update.task_name.clone()),
            error: current
                .filter(|update| update.state == TaskState::Failed)
                .and_then(|update| update.error),
            task_history: history,
        })
    }
}
