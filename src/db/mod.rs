//! Queue store: SQLite persistence for downloads and servers
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - database lifecycle, schema migrations
//! - [`downloads`] - download queue CRUD and guarded status transitions
//! - [`servers`] - news server CRUD
//! - [`state`] - runtime state: the paused flag, speed gauge, extraction
//!   progress map, and the persisted VPN auto-connect flag

use sqlx::{FromRow, sqlite::SqlitePool};

use crate::types::DownloadId;

mod downloads;
mod migrations;
mod servers;
mod state;

pub use state::RuntimeState;

/// Handle to the SQLite queue store
#[derive(Debug, Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

/// New download to be inserted into the queue
#[derive(Debug, Clone)]
pub struct NewDownload {
    /// Display name for this job (directory-safe)
    pub name: String,
    /// Category for organizing downloads
    pub category: Option<String>,
    /// Raw NZB bytes, re-parsed by the engine when the job is picked
    pub raw_nzb: Vec<u8>,
    /// Total bytes across all segments, precomputed from the plan
    pub total_bytes: i64,
    /// Total segment count, precomputed from the plan
    pub total_segments: i64,
    /// Archive password from the NZB metadata
    pub password: Option<String>,
}

/// Download job record
#[derive(Debug, Clone, FromRow)]
pub struct Download {
    /// Unique database ID
    pub id: i64,
    /// Display name for this job
    pub name: String,
    /// Category for organizing downloads
    pub category: Option<String>,
    /// Current status (see [`crate::types::Status`])
    pub status: i32,
    /// Total size in bytes
    pub total_bytes: i64,
    /// Bytes downloaded so far
    pub downloaded_bytes: i64,
    /// Total segment count
    pub total_segments: i64,
    /// Segments completed so far
    pub done_segments: i64,
    /// Destination directory under the incomplete root
    pub path: Option<String>,
    /// Raw NZB bytes
    pub raw_nzb: Vec<u8>,
    /// Archive password from the NZB metadata
    pub password: Option<String>,
    /// Error message if the job failed
    pub error_msg: Option<String>,
    /// Unix timestamp when the job was enqueued
    pub created_at: i64,
    /// Unix timestamp when the job reached a terminal state
    pub completed_at: Option<i64>,
}

impl Download {
    /// Typed download id
    pub fn download_id(&self) -> DownloadId {
        DownloadId(self.id)
    }

    /// Typed status
    pub fn status(&self) -> crate::types::Status {
        crate::types::Status::from_i32(self.status)
    }
}

/// New server to be inserted
#[derive(Debug, Clone)]
pub struct NewServer {
    /// Display name (unique per installation)
    pub name: String,
    /// Server hostname
    pub host: String,
    /// Server port
    pub port: u16,
    /// Use TLS
    pub tls: bool,
    /// Username for authentication
    pub username: Option<String>,
    /// Password for authentication
    pub password: Option<String>,
    /// Desired connection count (clamped to 1..=50 at pool creation)
    pub connections: u32,
    /// Whether this server participates in fetching
    pub enabled: bool,
}

/// News server record
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct NewsServer {
    /// Stable identity
    pub id: i64,
    /// Display name (unique per installation)
    pub name: String,
    /// Server hostname
    pub host: String,
    /// Server port
    pub port: u16,
    /// Use TLS
    pub tls: bool,
    /// Username for authentication
    pub username: Option<String>,
    /// Password for authentication
    pub password: Option<String>,
    /// Desired connection count
    pub connections: u32,
    /// Whether this server participates in fetching
    pub enabled: bool,
}

impl From<&crate::config::ServerConfig> for NewServer {
    fn from(cfg: &crate::config::ServerConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            host: cfg.host.clone(),
            port: cfg.port,
            tls: cfg.tls,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            connections: cfg.connections,
            enabled: cfg.enabled,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers {
    use super::Database;

    /// In-memory database for unit tests
    pub(crate) async fn memory_db() -> Database {
        Database::in_memory().await.expect("in-memory db")
    }
}
