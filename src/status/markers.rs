use super::update::TaskState;

pub const ENRICHMENT_TERMINAL_TASK: &str = "Creating enrich data";
pub const HYPOTHESIS_TERMINAL_TASK: &str = "Generating hypothesis";
pub const VERIFYING_EXISTENCE_PREFIX: &str = "Verifying existence";

const ENRICHMENT_SHORTCUT_PROGRESS: f64 = 80.0;
const HYPOTHESIS_SHORTCUT_PROGRESS: f64 = 100.0;

/// Coarse milestone reached by a completed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    EnrichmentCompleted,
    HypothesisCompleted,
}

impl Milestone {
    pub fn pinned_progress(self) -> f64 {
        match self {
            Milestone::EnrichmentCompleted => ENRICHMENT_SHORTCUT_PROGRESS,
            Milestone::HypothesisCompleted => HYPOTHESIS_SHORTCUT_PROGRESS,
        }
    }
}

fn is_existence_check(task_name: &str) -> bool {
    task_name.starts_with(VERIFYING_EXISTENCE_PREFIX)
}

/// True when this transition closes a phase and the instance must be
/// finalized into the durable store.
///
/// An existence check reporting 80 means the enrichment results were already
/// available and the phase was skipped.
pub fn is_phase_terminal(task_name: &str, state: TaskState, progress: f64) -> bool {
    state.is_settled()
        && (task_name == ENRICHMENT_TERMINAL_TASK
            || task_name == HYPOTHESIS_TERMINAL_TASK
            || (is_existence_check(task_name) && progress == ENRICHMENT_SHORTCUT_PROGRESS))
}

pub fn milestone_for(task_name: &str, state: TaskState, progress: f64) -> Option<Milestone> {
    match state {
        TaskState::Completed => {}
        TaskState::Started | TaskState::Failed | TaskState::Retrying => return None,
    }
    if task_name == ENRICHMENT_TERMINAL_TASK
        || (is_existence_check(task_name) && progress == ENRICHMENT_SHORTCUT_PROGRESS)
    {
        return Some(Milestone::EnrichmentCompleted);
    }
    if task_name == HYPOTHESIS_TERMINAL_TASK
        || (is_existence_check(task_name) && progress == HYPOTHESIS_SHORTCUT_PROGRESS)
    {
        return Some(Milestone::HypothesisCompleted);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_tasks_close_on_completion_or_failure() {
        for state in [TaskState::Completed, TaskState::Failed] {
            assert!(is_phase_terminal("Creating enrich data", state, 0.0));
            assert!(is_phase_terminal("Generating hypothesis", state, 0.0));
        }
        assert!(!is_phase_terminal("Creating enrich data", TaskState::Started, 0.0));
        assert!(!is_phase_terminal("Generating hypothesis", TaskState::Retrying, 0.0));
    }

    #[test]
    fn existence_check_only_closes_at_eighty() {
        let name = "Verifying existence of enrichment data";
        assert!(is_phase_terminal(name, TaskState::Completed, 80.0));
        assert!(!is_phase_terminal(name, TaskState::Completed, 10.0));
        assert!(!is_phase_terminal(name, TaskState::Started, 80.0));
        assert!(!is_phase_terminal(
            "Verifying existence of hypothesis data",
            TaskState::Completed,
            100.0
        ));
    }

    #[test]
    fn milestones_follow_completed_markers() {
        assert_eq!(
            milestone_for("Creating enrich data", TaskState::Completed, 0.0),
            Some(Milestone::EnrichmentCompleted)
        );
        assert_eq!(
            milestone_for("Verifying existence of hypothesis data", TaskState::Completed, 100.0),
            Some(Milestone::HypothesisCompleted)
        );
        assert_eq!(
            milestone_for("Generating hypothesis", TaskState::Failed, 0.0),
            None
        );
        assert_eq!(
            milestone_for("Querying gene data", TaskState::Completed, 90.0),
            None
        );
    }
}
