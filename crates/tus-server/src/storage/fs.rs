use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{ByteReader, ByteStream, ChunkStorage, StorageError};

/// Filesystem chunk storage: one append-only file per upload, named by id.
pub struct FsStorage {
    base_path: PathBuf,
}

impl FsStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create the upload directory and check that it is writable.
    pub async fn init(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.base_path).await?;

        let probe = tempfile::NamedTempFile::new_in(&self.base_path)?;
        probe.close()?;
        Ok(())
    }

    fn upload_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join(id.simple().to_string())
    }
}

/// Copy the whole reader to the end of `file`, returning the byte count.
async fn copy_to_end(data: &mut ByteReader, file: &mut File) -> std::io::Result<u64> {
    let mut buf = vec![0u8; 128 * 1024];
    let mut written = 0u64;

    loop {
        let n = data.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        written += n as u64;
    }

    file.flush().await?;
    file.sync_data().await?;
    Ok(written)
}

#[async_trait]
impl ChunkStorage for FsStorage {
    async fn append(
        &self,
        id: Uuid,
        expected_offset: u64,
        mut data: ByteReader,
    ) -> Result<u64, StorageError> {
        let path = self.upload_path(id);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(StorageError::WriteFailed)?;

        let current = file.metadata().await?.len();
        if current != expected_offset {
            return Err(StorageError::OffsetMismatch {
                expected: expected_offset,
                actual: current,
            });
        }

        match copy_to_end(&mut data, &mut file).await {
            Ok(written) => {
                debug!(upload_id = %id, offset = expected_offset, written, "Appended chunk");
                Ok(expected_offset + written)
            }
            Err(e) => {
                warn!(upload_id = %id, error = %e, "Chunk write failed, rolling back");
                // Only the bytes of this call are discarded
                if let Err(rollback) = file.set_len(expected_offset).await {
                    error!(upload_id = %id, error = %rollback, "Rollback after failed write failed");
                }
                Err(StorageError::WriteFailed(e))
            }
        }
    }

    async fn len(&self, id: Uuid) -> Result<u64, StorageError> {
        match fs::metadata(self.upload_path(id)).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn truncate(&self, id: Uuid, len: u64) -> Result<(), StorageError> {
        let file = OpenOptions::new()
            .write(true)
            .open(self.upload_path(id))
            .await
            .map_err(StorageError::from_open)?;

        if file.metadata().await?.len() > len {
            file.set_len(len).await?;
            file.sync_data().await?;
        }
        Ok(())
    }

    async fn open(&self, id: Uuid) -> Result<ByteStream, StorageError> {
        let file = File::open(self.upload_path(id))
            .await
            .map_err(StorageError::from_open)?;

        let reader = BufReader::with_capacity(64 * 1024, file);
        let stream = ReaderStream::new(reader).map(|result| result.map_err(StorageError::Io));

        Ok(Box::new(stream))
    }
}
