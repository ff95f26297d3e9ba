use std::net::SocketAddr;
use std::path::PathBuf;

/// Default upload size ceiling: 1 GiB.
pub const DEFAULT_MAX_SIZE: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub storage_path: PathBuf,
    /// Largest declared upload length accepted, in bytes
    pub max_size: u64,
}

impl Config {
    /// Directory holding one backing file per upload.
    pub fn uploads_dir(&self) -> PathBuf {
        self.storage_path.join("uploads")
    }

    /// SQLite database holding session records.
    pub fn sessions_db_path(&self) -> PathBuf {
        self.storage_path.join("sessions.db")
    }
}
