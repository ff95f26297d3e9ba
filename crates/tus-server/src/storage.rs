use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::io::AsyncRead;
use uuid::Uuid;

mod fs;
mod types;

pub use fs::FsStorage;
pub use types::StorageError;

/// A boxed stream of byte chunks for streaming reads
pub type ByteStream = Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send + Unpin>;

/// A boxed async reader for streaming writes
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Backing byte storage for upload sessions, one object per upload id.
///
/// Implementations are the only place the physical bytes of an upload are
/// mutated. The engine serialises calls per id; implementations must still
/// tolerate concurrent calls for different ids.
#[async_trait]
pub trait ChunkStorage: Send + Sync + 'static {
    /// Append everything read from `data` to the object for `id`.
    ///
    /// Creates the object if it does not exist yet. MUST fail with
    /// `OffsetMismatch` if the stored length differs from `expected_offset`
    /// before any byte is written. On a failed write the object is restored
    /// to `expected_offset` bytes and `WriteFailed` is returned.
    ///
    /// Returns the new total stored length.
    async fn append(
        &self,
        id: Uuid,
        expected_offset: u64,
        data: ByteReader,
    ) -> Result<u64, StorageError>;

    /// Current stored length, 0 if nothing was stored yet.
    async fn len(&self, id: Uuid) -> Result<u64, StorageError>;

    /// Shrink the object back to `len` bytes. Never grows it.
    async fn truncate(&self, id: Uuid, len: u64) -> Result<(), StorageError>;

    /// Stream the stored bytes from the start.
    async fn open(&self, id: Uuid) -> Result<ByteStream, StorageError>;
}
