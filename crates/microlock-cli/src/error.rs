use microlock_core::{LockError, StoreError};

/// Exit status for success
pub const EXIT_OK: u8 = 0;
/// Exit status for any failure other than contention
pub const EXIT_FAILURE: u8 = 1;
/// Exit status when the lock is held by someone else or not held by us
pub const EXIT_CONTENTION: u8 = 2;

/// Error type for CLI operations
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Lock(e) if e.is_contention() => EXIT_CONTENTION,
            _ => EXIT_FAILURE,
        }
    }
}
