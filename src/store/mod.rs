use crate::status::update::StepUpdate;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create history database parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("invalid stored update for `{instance_id}`: {reason}")]
    InvalidRow { instance_id: String, reason: String },
    #[error("history store lock poisoned")]
    Poisoned,
}

/// Authoritative store for finalized step histories, one collection keyed by
/// instance id.
pub trait HistoryStore: Send + Sync {
    /// Updates in insertion order; empty when the instance was never stored.
    fn find_all(&self, instance_id: &str) -> Result<Vec<StepUpdate>, StoreError>;

    fn delete_all(&self, instance_id: &str) -> Result<usize, StoreError>;

    fn insert_batch(&self, instance_id: &str, updates: &[StepUpdate]) -> Result<(), StoreError>;

    /// Replaces the whole history of an instance.
    fn replace_all(&self, instance_id: &str, updates: &[StepUpdate]) -> Result<(), StoreError> {
        self.delete_all(instance_id)?;
        if updates.is_empty() {
            return Ok(());
        }
        self.insert_batch(instance_id, updates)
    }
}
