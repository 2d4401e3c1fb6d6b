use crate::cache::CacheError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("instance id is required: {0}")]
    MissingInstanceId(String),
    #[error("unknown task state `{value}`; expected one of: started, completed, failed, retrying")]
    UnknownState { value: String },
    #[error("progress must be a number between 0 and 100, got {value}")]
    InvalidProgress { value: f64 },
    #[error("status cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("history store error: {0}")]
    Store(#[from] StoreError),
}

impl TrackerError {
    /// Invalid-input errors abort the calling step; everything else is a
    /// collaborator failure.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            TrackerError::MissingInstanceId(_)
                | TrackerError::UnknownState { .. }
                | TrackerError::InvalidProgress { .. }
        )
    }
}
