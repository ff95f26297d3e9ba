//! Failure kinds surfaced by the upload engine.
//!
//! Every engine operation returns one of these variants so the HTTP layer can
//! map it onto a TUS status code without inspecting messages.

use thiserror::Error;
use uuid::Uuid;

use crate::db::DbError;
use crate::storage::StorageError;

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid upload length {length:?}, must be between 1 and {max}")]
    InvalidSize { length: Option<i64>, max: u64 },

    #[error("Upload not found: {0}")]
    NotFound(Uuid),

    #[error("Missing or invalid Upload-Offset")]
    MissingOffset,

    #[error("Missing or invalid Content-Length")]
    MissingContentLength,

    #[error("Unsupported content type: {0:?}")]
    UnsupportedContentKind(Option<String>),

    #[error("Offset conflict: claimed {claimed}, server has {actual}")]
    OffsetConflict { claimed: u64, actual: u64 },

    #[error("Upload would grow to {attempted} bytes, declared length is {declared}")]
    SizeExceeded { declared: u64, attempted: u64 },

    #[error("Received offset {received} exceeds declared length {declared}")]
    SizeInvariantViolated { declared: u64, received: u64 },

    #[error("Failed to write chunk: {0}")]
    StorageWriteFailed(#[source] std::io::Error),

    #[error("Stored length {actual} does not match expected offset {expected}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("Upload incomplete: {received} of {declared} bytes received")]
    UploadIncomplete { declared: u64, received: u64 },

    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::WriteFailed(e) => UploadError::StorageWriteFailed(e),
            StorageError::OffsetMismatch { expected, actual } => {
                UploadError::OffsetMismatch { expected, actual }
            }
            other => UploadError::Storage(other),
        }
    }
}

impl UploadError {
    /// Whether this error indicates a server-side fault rather than a bad request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            UploadError::SizeInvariantViolated { .. }
                | UploadError::StorageWriteFailed(_)
                | UploadError::Storage(_)
                | UploadError::Database(_)
        )
    }
}
