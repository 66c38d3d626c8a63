use thiserror::Error;

use crate::store::StoreError;

/// Caller-facing error taxonomy for vault operations.
///
/// Wrong passwords and corrupted objects share one variant so callers cannot
/// tell which check failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("password must be at least {min_len} characters")]
    WeakPassword { min_len: usize },
    #[error("object not found: {id}")]
    NotFound { id: String },
    #[error("object has expired: {id}")]
    Expired { id: String },
    #[error("wrong password or corrupted object")]
    WrongPasswordOrCorrupt,
    #[error("too many failed attempts ({attempts}); try again later")]
    LockedOut { attempts: u32 },
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id } => VaultError::NotFound { id },
            StoreError::Corrupt { .. } => VaultError::WrongPasswordOrCorrupt,
            StoreError::Storage { reason } => VaultError::Storage { reason },
        }
    }
}
