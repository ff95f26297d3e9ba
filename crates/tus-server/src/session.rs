//! Upload session records and the concurrent store that owns them.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Serialize, Serializer};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use uuid::Uuid;

use crate::db::SessionDb;
use crate::error::{UploadError, UploadResult};

/// One resumable upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    #[serde(serialize_with = "serialize_id")]
    pub id: Uuid,
    pub declared_length: u64,
    pub received_offset: u64,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Unix seconds
    pub created_at: i64,
}

fn serialize_id<S: Serializer>(id: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&id.simple())
}

/// Protocol state, derived from the record rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing received yet
    Created,
    /// Some but not all bytes received
    InProgress,
    /// Every declared byte received
    Completed,
}

impl SessionRecord {
    pub fn new(id: Uuid, declared_length: u64, display_name: Option<String>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        Self {
            id,
            declared_length,
            received_offset: 0,
            completed: false,
            display_name,
            created_at,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.received_offset >= self.declared_length {
            SessionState::Completed
        } else if self.received_offset == 0 {
            SessionState::Created
        } else {
            SessionState::InProgress
        }
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_offset == self.declared_length
    }
}

/// A mutation applied atomically to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Move the received offset forward, completing the session if it
    /// reaches the declared length.
    Advance { offset: u64 },
    /// Record completion of a session whose bytes are all received.
    MarkCompleted,
    /// Overwrite the offset with what storage actually holds.
    Reconcile { offset: u64 },
}

impl SessionUpdate {
    fn apply(self, record: &mut SessionRecord) -> UploadResult<()> {
        match self {
            SessionUpdate::Advance { offset } => {
                if offset < record.received_offset {
                    return Err(UploadError::OffsetConflict {
                        claimed: offset,
                        actual: record.received_offset,
                    });
                }
                record.received_offset = offset;
                if record.is_fully_received() {
                    record.completed = true;
                }
            }
            SessionUpdate::MarkCompleted => {
                if !record.is_fully_received() {
                    return Err(UploadError::UploadIncomplete {
                        declared: record.declared_length,
                        received: record.received_offset,
                    });
                }
                record.completed = true;
            }
            SessionUpdate::Reconcile { offset } => {
                record.received_offset = offset;
                record.completed = record.is_fully_received();
            }
        }

        if record.received_offset > record.declared_length {
            return Err(UploadError::SizeInvariantViolated {
                declared: record.declared_length,
                received: record.received_offset,
            });
        }
        Ok(())
    }
}

struct SessionSlot {
    record: RwLock<SessionRecord>,
    append: Arc<tokio::sync::Mutex<()>>,
}

impl SessionSlot {
    fn new(record: SessionRecord) -> Self {
        Self {
            record: RwLock::new(record),
            append: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn snapshot(&self) -> SessionRecord {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Exclusive right to mutate one session's bytes, held across a chunk append.
pub struct SessionLock {
    _guard: OwnedMutexGuard<()>,
}

/// All session records, keyed by id.
///
/// The map is sharded, so lookups for unrelated sessions do not contend.
/// Each record sits behind its own lock and every update is written through
/// to the database before it becomes visible.
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<SessionSlot>>,
    db: Mutex<SessionDb>,
    max_size: u64,
}

impl SessionStore {
    /// Build a store from everything the database holds.
    pub fn load(db: SessionDb, max_size: u64) -> UploadResult<Self> {
        let sessions = DashMap::new();
        for record in db.load_sessions()? {
            sessions.insert(record.id, Arc::new(SessionSlot::new(record)));
        }
        debug!(count = sessions.len(), "Loaded upload sessions");

        Ok(Self {
            sessions,
            db: Mutex::new(db),
            max_size,
        })
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Create a session for `declared_length` bytes.
    pub fn create(
        &self,
        declared_length: Option<i64>,
        display_name: Option<String>,
    ) -> UploadResult<SessionRecord> {
        let length = match declared_length {
            Some(len) if len >= 1 && (len as u64) <= self.max_size => len as u64,
            _ => {
                return Err(UploadError::InvalidSize {
                    length: declared_length,
                    max: self.max_size,
                });
            }
        };

        // The row is written before the map shard is touched; the primary
        // key rejects the rare id collision
        loop {
            let id = Uuid::new_v4();
            if self.sessions.contains_key(&id) {
                continue;
            }

            let record = SessionRecord::new(id, length, display_name);
            self.db().insert_session(&record)?;
            self.sessions
                .insert(id, Arc::new(SessionSlot::new(record.clone())));
            return Ok(record);
        }
    }

    /// Snapshot of one record.
    pub fn get(&self, id: Uuid) -> UploadResult<SessionRecord> {
        Ok(self.slot(id)?.snapshot())
    }

    /// Apply `update` to the record for `id` and persist it.
    ///
    /// Updates to the same id never interleave; readers see either the old or
    /// the new record. Returns the record as stored.
    pub fn update(&self, id: Uuid, update: SessionUpdate) -> UploadResult<SessionRecord> {
        let slot = self.slot(id)?;
        let mut current = slot
            .record
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut next = current.clone();
        update.apply(&mut next)?;
        if next == *current {
            return Ok(next);
        }

        self.db().update_session(&next)?;
        *current = next.clone();
        Ok(next)
    }

    /// Wait for exclusive append access to `id`.
    pub async fn lock(&self, id: Uuid) -> UploadResult<SessionLock> {
        // Clone out of the map so no shard guard is held across the await
        let append = Arc::clone(&self.slot(id)?.append);
        Ok(SessionLock {
            _guard: append.lock_owned().await,
        })
    }

    /// Snapshot of every record, in no particular order.
    pub fn list(&self) -> Vec<SessionRecord> {
        self.sessions
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    fn slot(&self, id: Uuid) -> UploadResult<Arc<SessionSlot>> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(UploadError::NotFound(id))
    }

    fn db(&self) -> std::sync::MutexGuard<'_, SessionDb> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
