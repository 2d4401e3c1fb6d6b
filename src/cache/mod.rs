use crate::status::update::{CachedUpdate, StepUpdate};

pub mod file;
pub mod memory;

pub use file::FileStatusCache;
pub use memory::MemoryStatusCache;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt cache entry in {path} line {line}: {source}")]
    Corrupt {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode cache entry for `{instance_id}`: {source}")]
    Encode {
        instance_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache lock poisoned")]
    Poisoned,
}

/// Global membership sets kept by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheSet {
    InProgress,
    Persisted,
}

impl CacheSet {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheSet::InProgress => "in_progress",
            CacheSet::Persisted => "persisted",
        }
    }
}

impl std::fmt::Display for CacheSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fast, possibly volatile store holding the live status of in-progress
/// instances.
///
/// History entries are ordered by `(score, insertion sequence)`, so two
/// updates appended with the same score are both kept in arrival order.
pub trait StatusCache: Send + Sync {
    fn append_history(
        &self,
        instance_id: &str,
        score_millis: i64,
        update: &StepUpdate,
    ) -> Result<(), CacheError>;

    fn history(&self, instance_id: &str) -> Result<Vec<StepUpdate>, CacheError>;

    fn set_latest(&self, instance_id: &str, update: &CachedUpdate) -> Result<(), CacheError>;

    fn latest(&self, instance_id: &str) -> Result<Option<CachedUpdate>, CacheError>;

    /// Drops history and latest pointer. Set membership is left untouched.
    fn clear_instance(&self, instance_id: &str) -> Result<(), CacheError>;

    fn add_member(&self, set: CacheSet, instance_id: &str) -> Result<(), CacheError>;

    fn remove_member(&self, set: CacheSet, instance_id: &str) -> Result<(), CacheError>;

    /// Members in ascending order.
    fn members(&self, set: CacheSet) -> Result<Vec<String>, CacheError>;

    fn is_member(&self, set: CacheSet, instance_id: &str) -> Result<bool, CacheError>;
}
