use super::{HistoryStore, StoreError};
use crate::status::update::StepUpdate;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    collections: Mutex<HashMap<String, Vec<StepUpdate>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = self.lock()?.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<StepUpdate>>>, StoreError> {
        self.collections.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn find_all(&self, instance_id: &str) -> Result<Vec<StepUpdate>, StoreError> {
        Ok(self.lock()?.get(instance_id).cloned().unwrap_or_default())
    }

    fn delete_all(&self, instance_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .lock()?
            .remove(instance_id)
            .map(|updates| updates.len())
            .unwrap_or(0))
    }

    fn insert_batch(&self, instance_id: &str, updates: &[StepUpdate]) -> Result<(), StoreError> {
        self.lock()?
            .entry(instance_id.to_string())
            .or_default()
            .extend_from_slice(updates);
        Ok(())
    }

    fn replace_all(&self, instance_id: &str, updates: &[StepUpdate]) -> Result<(), StoreError> {
        let mut collections = self.lock()?;
        if updates.is_empty() {
            collections.remove(instance_id);
        } else {
            collections.insert(instance_id.to_string(), updates.to_vec());
        }
        Ok(())
    }
}
