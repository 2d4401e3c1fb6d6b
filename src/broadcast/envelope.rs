use crate::shared::Timestamp;
use crate::status::{milestone_for, Milestone, StepUpdate, TaskState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeStatus {
    #[serde(rename = "Enrichment_completed")]
    EnrichmentCompleted,
    #[serde(rename = "Hypothesis_completed")]
    HypothesisCompleted,
    #[serde(rename = "failed")]
    Failed,
}

impl EnvelopeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnrichmentCompleted => "Enrichment_completed",
            Self::HypothesisCompleted => "Hypothesis_completed",
            Self::Failed => "failed",
        }
    }
}

impl From<Milestone> for EnvelopeStatus {
    fn from(value: Milestone) -> Self {
        match value {
            Milestone::EnrichmentCompleted => EnvelopeStatus::EnrichmentCompleted,
            Milestone::HypothesisCompleted => EnvelopeStatus::HypothesisCompleted,
        }
    }
}

/// Normalized update pushed to every subscriber of an instance's topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEnvelope {
    pub hypothesis_id: String,
    pub timestamp: Timestamp,
    pub task: String,
    pub state: TaskState,
    pub progress: f64,
    /// Trailing window of recently completed updates.
    pub task_history: Vec<StepUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EnvelopeStatus>,
}

impl UpdateEnvelope {
    pub fn build(
        instance_id: &str,
        task: &str,
        state: TaskState,
        progress: f64,
        task_history: Vec<StepUpdate>,
        next_task: Option<String>,
        error: Option<String>,
    ) -> Self {
        let mut envelope = Self {
            hypothesis_id: instance_id.to_string(),
            timestamp: Timestamp::now(),
            task: task.to_string(),
            state,
            progress,
            task_history,
            next_task,
            error,
            status: None,
        };
        envelope.apply_status();
        envelope
    }

    fn apply_status(&mut self) {
        if self.error.is_some() {
            self.status = Some(EnvelopeStatus::Failed);
        }
        match self.state {
            TaskState::Completed => {
                if let Some(milestone) = milestone_for(&self.task, self.state, self.progress) {
                    self.status = Some(milestone.into());
                    self.progress = milestone.pinned_progress();
                }
            }
            TaskState::Failed => self.status = Some(EnvelopeStatus::Failed),
            TaskState::Started | TaskState::Retrying => {}
        }
    }
}
