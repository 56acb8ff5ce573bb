//! Lock error types

use crate::store::StoreError;

/// Error type for lock construction and lock operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("coordination store is required")]
    StoreRequired,

    #[error("key parameter must be a non-empty string")]
    KeyRequired,

    #[error("holder id parameter must be a non-empty string")]
    HolderRequired,

    #[error("ttl parameter must be a number, got {0:?}")]
    InvalidTtl(String),

    #[error("lock handles must be created within a Tokio runtime")]
    RuntimeRequired,

    #[error("lock \"{key}\" is already locked")]
    AlreadyLocked { key: String },

    #[error("lock \"{key}\" is not owned by holder \"{holder_id}\"")]
    LockNotOwned { key: String, holder_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LockError {
    /// Contention is the expected outcome of a lost CAS race, not a fault.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            LockError::AlreadyLocked { .. } | LockError::LockNotOwned { .. }
        )
    }

    /// Bad construction arguments; retrying with the same inputs cannot succeed.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            LockError::StoreRequired
                | LockError::KeyRequired
                | LockError::HolderRequired
                | LockError::InvalidTtl(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
