pub mod error;
pub mod history;
pub mod markers;
pub mod progress;
pub mod recovery;
pub mod snapshot;
pub mod tracker;
pub mod update;

pub use error::TrackerError;
pub use history::{merge_histories, trailing_completed};
pub use markers::{is_phase_terminal, milestone_for, Milestone};
pub use progress::{calculate_progress, PhaseWeights, ENRICHMENT_PHASE, HYPOTHESIS_PHASE};
pub use recovery::RecoveryReport;
pub use snapshot::{SnapshotStatus, StatusSnapshot};
pub use tracker::{FinalizeOutcome, RecordOutcome, StatusTracker};
pub use update::{CachedUpdate, StepReport, StepUpdate, TaskState};
