use super::{CacheError, CacheSet, StatusCache};
use crate::status::update::{CachedUpdate, StepUpdate};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct ScoredUpdate {
    score: i64,
    seq: u64,
    update: StepUpdate,
}

#[derive(Debug, Default)]
struct MemoryCacheState {
    histories: HashMap<String, Vec<ScoredUpdate>>,
    latest: HashMap<String, CachedUpdate>,
    in_progress: BTreeSet<String>,
    persisted: BTreeSet<String>,
    next_seq: u64,
}

impl MemoryCacheState {
    fn set_mut(&mut self, set: CacheSet) -> &mut BTreeSet<String> {
        match set {
            CacheSet::InProgress => &mut self.in_progress,
            CacheSet::Persisted => &mut self.persisted,
        }
    }

    fn set_ref(&self, set: CacheSet) -> &BTreeSet<String> {
        match set {
            CacheSet::InProgress => &self.in_progress,
            CacheSet::Persisted => &self.persisted,
        }
    }
}

/// Process-local cache; everything is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStatusCache {
    state: Mutex<MemoryCacheState>,
}

impl MemoryStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryCacheState>, CacheError> {
        self.state.lock().map_err(|_| CacheError::Poisoned)
    }
}

impl StatusCache for MemoryStatusCache {
    fn append_history(
        &self,
        instance_id: &str,
        score_millis: i64,
        update: &StepUpdate,
    ) -> Result<(), CacheError> {
        let mut state = self.lock()?;
        let seq = state.next_seq;
        state.next_seq = state.next_seq.wrapping_add(1);
        let entries = state.histories.entry(instance_id.to_string()).or_default();
        let entry = ScoredUpdate {
            score: score_millis,
            seq,
            update: update.clone(),
        };
        let index = entries.partition_point(|existing| {
            (existing.score, existing.seq) <= (entry.score, entry.seq)
        });
        entries.insert(index, entry);
        Ok(())
    }

    fn history(&self, instance_id: &str) -> Result<Vec<StepUpdate>, CacheError> {
        let state = self.lock()?;
        Ok(state
            .histories
            .get(instance_id)
            .map(|entries| entries.iter().map(|entry| entry.update.clone()).collect())
            .unwrap_or_default())
    }

    fn set_latest(&self, instance_id: &str, update: &CachedUpdate) -> Result<(), CacheError> {
        let mut state = self.lock()?;
        state.latest.insert(instance_id.to_string(), update.clone());
        Ok(())
    }

    fn latest(&self, instance_id: &str) -> Result<Option<CachedUpdate>, CacheError> {
        let state = self.lock()?;
        Ok(state.latest.get(instance_id).cloned())
    }

    fn clear_instance(&self, instance_id: &str) -> Result<(), CacheError> {
        let mut state = self.lock()?;
        state.histories.remove(instance_id);
        state.latest.remove(instance_id);
        Ok(())
    }

    fn add_member(&self, set: CacheSet, instance_id: &str) -> Result<(), CacheError> {
        let mut state = self.lock()?;
        state.set_mut(set).insert(instance_id.to_string());
        Ok(())
    }

    fn remove_member(&self, set: CacheSet, instance_id: &str) -> Result<(), CacheError> {
        let mut state = self.lock()?;
        state.set_mut(set).remove(instance_id);
        Ok(())
    }

    fn members(&self, set: CacheSet) -> Result<Vec<String>, CacheError> {
        let state = self.lock()?;
        Ok(state.set_ref(set).iter().cloned().collect())
    }

    fn is_member(&self, set: CacheSet, instance_id: &str) -> Result<bool, CacheError> {
        let state = self.lock()?;
        Ok(state.set_ref(set).contains(instance_id))
    }
}
