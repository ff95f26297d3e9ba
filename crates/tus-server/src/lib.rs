//! TUS server - resumable upload engine for the TUS 1.0.0 protocol.
//!
//! Clients create an upload with a declared length, then append chunks over
//! any number of requests. The server only accepts a chunk that starts at the
//! offset it has durably recorded, so an interrupted transfer resumes exactly
//! where it stopped.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod session;
pub mod storage;

pub use api::router;
pub use config::Config;
pub use db::{DbError, SessionDb};
pub use engine::{Download, OFFSET_CONTENT_TYPE, UploadEngine, UploadStatus};
pub use error::{UploadError, UploadResult};
pub use session::{SessionRecord, SessionState, SessionStore, SessionUpdate};
pub use storage::{ByteReader, ByteStream, ChunkStorage, FsStorage, StorageError};
