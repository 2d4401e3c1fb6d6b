use super::update::{StepUpdate, TaskState};
use crate::shared::Timestamp;
use std::collections::HashMap;

pub const TRAILING_WINDOW: usize = 5;

/// Merges histories in the given order, keyed by `(task, timestamp)`.
///
/// A later entry replaces an earlier one with the same key but keeps the
/// earlier entry's position among equal timestamps. The result is sorted
/// ascending by timestamp.
pub fn merge_histories<I>(sources: I) -> Vec<StepUpdate>
where
    I: IntoIterator,
    I::Item: IntoIterator<Item = StepUpdate>,
{
    let mut merged: Vec<StepUpdate> = Vec::new();
    let mut positions: HashMap<(String, Timestamp), usize> = HashMap::new();

    for source in sources {
        for update in source {
            let key = (update.task_name.clone(), update.timestamp);
            match positions.get(&key) {
                Some(&index) => merged[index] = update,
                None => {
                    positions.insert(key, merged.len());
                    merged.push(update);
                }
            }
        }
    }

    merged.sort_by_key(|update| update.timestamp);
    merged
}

/// Up to the last [`TRAILING_WINDOW`] completed updates, oldest first.
pub fn trailing_completed(history: &[StepUpdate]) -> Vec<StepUpdate> {
    let completed = history
        .iter()
        .filter(|update| update.state == TaskState::Completed)
        .cloned()
        .collect::<Vec<_>>();
    let skip = completed.len().saturating_sub(TRAILING_WINDOW);
    completed.into_iter().skip(skip).collect()
}
