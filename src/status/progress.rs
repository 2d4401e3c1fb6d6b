use super::update::{StepUpdate, TaskState};

/// Fixed weight table for one pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseWeights {
    pub name: &'static str,
    /// Percentage points the phase contributes when every task completed.
    pub share: f64,
    pub tasks: &'static [(&'static str, u32)],
}

pub const ENRICHMENT_PHASE: PhaseWeights = PhaseWeights {
    name: "enrichment",
    share: 80.0,
    tasks: &[
        ("Verifying existence of enrichment data", 10),
        ("Getting candidate genes", 10),
        ("Predicting causal gene", 20),
        ("Getting relevant gene proof", 20),
        ("Creating enrich data", 20),
    ],
};

pub const HYPOTHESIS_PHASE: PhaseWeights = PhaseWeights {
    name: "hypothesis",
    share: 20.0,
    tasks: &[
        ("Verifying existence of hypothesis data", 2),
        ("Getting enrichment data", 2),
        ("Getting gene data", 2),
        ("Querying gene data", 3),
        ("Querying variant data", 3),
        ("Querying phenotype data", 3),
        ("Generating graph summary", 3),
        ("Generating hypothesis", 2),
    ],
};

impl PhaseWeights {
    pub fn weight_of(&self, task_name: &str) -> Option<u32> {
        self.tasks
            .iter()
            .find(|(name, _)| *name == task_name)
            .map(|(_, weight)| *weight)
    }

    pub fn total(&self) -> u32 {
        self.tasks.iter().map(|(_, weight)| weight).sum()
    }

    fn contribution(&self, completed_weight: u32) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        f64::from(completed_weight) / f64::from(total) * self.share
    }
}

/// Maps a step history to a 0-100 percentage.
///
/// Only completed updates count. Each phase is normalized independently to
/// its share, the sum is capped at 100 and rounded to two decimals.
pub fn calculate_progress(history: &[StepUpdate]) -> f64 {
    let mut enrichment = 0u32;
    let mut hypothesis = 0u32;

    for update in history {
        match update.state {
            TaskState::Completed => {}
            TaskState::Started | TaskState::Failed | TaskState::Retrying => continue,
        }
        if let Some(weight) = ENRICHMENT_PHASE.weight_of(&update.task_name) {
            enrichment = enrichment.saturating_add(weight);
        } else if let Some(weight) = HYPOTHESIS_PHASE.weight_of(&update.task_name) {
            hypothesis = hypothesis.saturating_add(weight);
        }
    }

    let total =
        ENRICHMENT_PHASE.contribution(enrichment) + HYPOTHESIS_PHASE.contribution(hypothesis);
    round_to_cents(total.min(100.0))
}

fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
