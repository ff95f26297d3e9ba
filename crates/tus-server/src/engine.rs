//! The resumable upload state machine.
//!
//! Ties the session store to chunk storage:
//! - `start_upload` - create a session with a declared length
//! - `query_status` - report how many bytes have been received
//! - `append_chunk` - accept bytes only at the current offset
//! - `fetch_completed` - stream a fully received upload back out

use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::SessionDb;
use crate::error::{UploadError, UploadResult};
use crate::session::{SessionRecord, SessionStore, SessionUpdate};
use crate::storage::{ByteReader, ByteStream, ChunkStorage, FsStorage};

/// The only media type accepted for chunk bodies.
pub const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// Progress of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadStatus {
    pub offset: u64,
    pub length: u64,
}

/// A completed upload ready to be streamed to a client.
pub struct Download {
    pub id: Uuid,
    pub length: u64,
    pub display_name: Option<String>,
    pub stream: ByteStream,
}

impl Download {
    /// Name to present the file under.
    pub fn file_name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.id.simple().to_string())
    }
}

pub struct UploadEngine<S: ChunkStorage> {
    store: SessionStore,
    storage: S,
}

impl UploadEngine<FsStorage> {
    /// Open the on-disk store described by `config` and reconcile it with
    /// the backing files.
    pub async fn open(config: &Config) -> UploadResult<Self> {
        let storage = FsStorage::new(config.uploads_dir());
        storage.init().await?;

        let db = SessionDb::open(&config.sessions_db_path())?;
        let store = SessionStore::load(db, config.max_size)?;

        let engine = Self::new(store, storage);
        let repaired = engine.recover().await?;
        if repaired > 0 {
            info!(repaired, "Reconciled upload sessions with storage");
        }
        Ok(engine)
    }
}

impl<S: ChunkStorage> UploadEngine<S> {
    pub fn new(store: SessionStore, storage: S) -> Self {
        Self { store, storage }
    }

    pub fn max_size(&self) -> u64 {
        self.store.max_size()
    }

    /// Create a new upload session and return its id.
    pub fn start_upload(
        &self,
        declared_length: Option<i64>,
        display_name: Option<String>,
    ) -> UploadResult<Uuid> {
        let record = self.store.create(declared_length, display_name)?;
        info!(upload_id = %record.id, length = record.declared_length, "Created upload");
        Ok(record.id)
    }

    pub fn query_status(&self, id: Uuid) -> UploadResult<UploadStatus> {
        let record = self.store.get(id)?;
        Ok(UploadStatus {
            offset: record.received_offset,
            length: record.declared_length,
        })
    }

    /// Append one chunk at `claimed_offset`, returning the new offset.
    ///
    /// The chunk is only accepted if it starts exactly where the previous
    /// accepted chunk ended. At most one append per session runs at a time.
    pub async fn append_chunk(
        &self,
        id: Uuid,
        claimed_offset: Option<i64>,
        content_length: Option<i64>,
        content_kind: Option<&str>,
        data: ByteReader,
    ) -> UploadResult<u64> {
        let claimed = claimed_offset
            .filter(|offset| *offset >= 0)
            .ok_or(UploadError::MissingOffset)? as u64;
        let content_length = content_length
            .filter(|len| *len >= 0)
            .ok_or(UploadError::MissingContentLength)? as u64;
        if !is_offset_content(content_kind) {
            return Err(UploadError::UnsupportedContentKind(
                content_kind.map(str::to_owned),
            ));
        }

        let _lock = self.store.lock(id).await?;
        let record = self.store.get(id)?;

        if claimed != record.received_offset {
            return Err(UploadError::OffsetConflict {
                claimed,
                actual: record.received_offset,
            });
        }

        if record.declared_length < record.received_offset {
            return Err(UploadError::SizeInvariantViolated {
                declared: record.declared_length,
                received: record.received_offset,
            });
        }

        if record.is_fully_received() {
            debug!(upload_id = %id, "Upload already fully received");
            if !record.completed {
                self.store.update(id, SessionUpdate::MarkCompleted)?;
            }
            return Ok(record.received_offset);
        }

        // One byte past the declared length is enough to detect an overflow
        let remaining = record.declared_length - record.received_offset;
        let data: ByteReader = Box::new(data.take(remaining + 1));
        let new_offset = self
            .storage
            .append(id, record.received_offset, data)
            .await?;

        if new_offset > record.declared_length {
            warn!(
                upload_id = %id,
                declared = record.declared_length,
                attempted = new_offset,
                "Chunk exceeds declared length, discarding"
            );
            self.discard(id, record.received_offset).await?;
            return Err(UploadError::SizeExceeded {
                declared: record.declared_length,
                attempted: new_offset,
            });
        }

        let written = new_offset - record.received_offset;
        if written != content_length {
            debug!(upload_id = %id, content_length, written, "Content-Length differs from bytes read");
        }

        let updated = match self
            .store
            .update(id, SessionUpdate::Advance { offset: new_offset })
        {
            Ok(updated) => updated,
            Err(err) => {
                self.discard(id, record.received_offset).await?;
                return Err(err);
            }
        };

        if updated.completed {
            info!(upload_id = %id, length = updated.declared_length, "Upload complete");
        } else {
            debug!(upload_id = %id, offset = new_offset, state = ?updated.state(), "Chunk accepted");
        }
        Ok(new_offset)
    }

    /// Open a fully received upload for download.
    pub async fn fetch_completed(&self, id: Uuid) -> UploadResult<Download> {
        let mut record = self.store.get(id)?;

        if record.is_fully_received() && !record.completed {
            record = self.store.update(id, SessionUpdate::MarkCompleted)?;
        }

        if !record.completed {
            debug!(upload_id = %id, state = ?record.state(), "Download requested before completion");
            return Err(UploadError::UploadIncomplete {
                declared: record.declared_length,
                received: record.received_offset,
            });
        }

        let stream = self.storage.open(id).await?;
        Ok(Download {
            id,
            length: record.declared_length,
            display_name: record.display_name,
            stream,
        })
    }

    pub fn list(&self) -> Vec<SessionRecord> {
        self.store.list()
    }

    /// Bring every record in line with what storage actually holds.
    ///
    /// Bytes appended before a crash but never recorded are adopted when they
    /// fit the declared length; anything beyond it is cut back to the
    /// recorded offset. Returns how many records changed.
    pub async fn recover(&self) -> UploadResult<usize> {
        let mut repaired = 0;

        for record in self.store.list() {
            let stored = self.storage.len(record.id).await?;

            let offset = if stored > record.declared_length {
                warn!(
                    upload_id = %record.id,
                    stored,
                    declared = record.declared_length,
                    "Stored upload exceeds declared length, truncating"
                );
                self.storage
                    .truncate(record.id, record.received_offset)
                    .await?;
                record.received_offset
            } else {
                stored
            };

            let completed = offset == record.declared_length;
            if offset != record.received_offset || completed != record.completed {
                info!(
                    upload_id = %record.id,
                    recorded = record.received_offset,
                    stored = offset,
                    "Reconciling upload offset"
                );
                self.store
                    .update(record.id, SessionUpdate::Reconcile { offset })?;
                repaired += 1;
            }
        }

        Ok(repaired)
    }

    /// Cut storage back to `offset` after a rejected append.
    async fn discard(&self, id: Uuid, offset: u64) -> UploadResult<()> {
        self.storage.truncate(id, offset).await.map_err(|e| {
            error!(upload_id = %id, error = %e, "Failed to discard rejected bytes");
            UploadError::from(e)
        })
    }
}

fn is_offset_content(content_kind: Option<&str>) -> bool {
    content_kind
        .and_then(|kind| kind.split(';').next())
        .is_some_and(|kind| kind.trim().eq_ignore_ascii_case(OFFSET_CONTENT_TYPE))
}
