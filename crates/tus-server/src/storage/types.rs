use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Object not found")]
    NotFound,

    #[error("Write failed: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("Stored length {actual} does not match expected offset {expected}")]
    OffsetMismatch { expected: u64, actual: u64 },
}

impl StorageError {
    pub(crate) fn from_open(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound
        } else {
            StorageError::Io(e)
        }
    }
}
