//! Error types for the sync layer.

use thiserror::Error;

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced to screens by sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No authenticated viewer; the mutation was never attempted.
    #[error("no authenticated viewer")]
    Unauthenticated,

    /// The remote store rejected the write because another actor changed
    /// the row first.
    #[error("conflicting remote write: {0}")]
    Conflict(String),

    /// The remote call did not complete within the configured deadline.
    #[error("remote call timed out")]
    Timeout,

    /// The remote store could not be reached.
    #[error("remote store unreachable: {0}")]
    Unreachable(String),

    /// The viewer tried to acquire their own listing.
    #[error("cannot acquire your own listing")]
    SelfPurchaseForbidden,

    /// The listing was already acquired by someone else.
    #[error("listing already sold")]
    AlreadySold,

    /// The named parent comment cannot anchor a reply.
    #[error("invalid parent comment: {0}")]
    InvalidParent(String),

    /// Cache-level failure (missing entity, stale token).
    #[error("cache error: {0}")]
    Cache(#[from] atelier_engine::Error),

    /// Any other remote store failure.
    #[error("remote store error: {0}")]
    Store(String),
}

impl From<crate::remote::StoreError> for SyncError {
    fn from(err: crate::remote::StoreError) -> Self {
        use crate::remote::StoreError;
        match err {
            StoreError::Conflict(msg) => SyncError::Conflict(msg),
            StoreError::Unreachable(msg) => SyncError::Unreachable(msg),
            StoreError::NotFound(msg) | StoreError::Rejected(msg) => SyncError::Store(msg),
        }
    }
}
