//! Core types for nzbtunnel

use serde::{Deserialize, Serialize};

/// Unique identifier for a download job
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub i64);

impl DownloadId {
    /// Create a new DownloadId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }

    /// Render this id the way the SABnzbd control plane expects it
    /// (`SABnzbd_nzo_<id>`).
    pub fn to_nzo_id(&self) -> String {
        format!("SABnzbd_nzo_{}", self.0)
    }

    /// Parse a SABnzbd `nzo_id` back into a DownloadId.
    ///
    /// Bare integers are accepted too, so `DELETE /api/queue/7` and
    /// `DELETE /api/queue/SABnzbd_nzo_7` both address the same job.
    pub fn from_nzo_id(s: &str) -> Option<Self> {
        let raw = s.strip_prefix("SABnzbd_nzo_").unwrap_or(s);
        raw.parse().ok().map(Self)
    }
}

impl From<i64> for DownloadId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<DownloadId> for i64 {
    fn from(id: DownloadId) -> Self {
        id.0
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DownloadId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for DownloadId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for DownloadId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for DownloadId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Download job status
///
/// Statuses form a state machine:
/// `Queued → Downloading → Processing → {Completed, Failed}`.
/// `Failed` is reachable from any non-terminal state. Terminal states
/// never transition; the database layer enforces this with guarded updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Queued and waiting for the engine driver
    Queued,
    /// Currently downloading
    Downloading,
    /// Handed to the post-processor (extraction)
    Processing,
    /// Successfully completed
    Completed,
    /// Failed with an error message
    Failed,
}

impl Status {
    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Queued,
            1 => Status::Downloading,
            2 => Status::Processing,
            3 => Status::Completed,
            4 => Status::Failed,
            _ => Status::Failed, // Corrupted rows surface visibly
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Queued => 0,
            Status::Downloading => 1,
            Status::Processing => 2,
            Status::Completed => 3,
            Status::Failed => 4,
        }
    }

    /// True for states that never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }

    /// Whether the state machine permits moving from `self` to `to`
    pub fn can_transition(&self, to: Status) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            Status::Queued => matches!(self, Status::Downloading | Status::Processing),
            Status::Downloading => matches!(self, Status::Queued),
            Status::Processing => matches!(self, Status::Downloading),
            Status::Completed => matches!(self, Status::Processing),
            Status::Failed => true,
        }
    }

    /// SABnzbd queue-slot status string (`Queued`/`Downloading`/`Extracting`)
    pub fn sab_queue_label(&self) -> &'static str {
        match self {
            Status::Queued => "Queued",
            Status::Downloading => "Downloading",
            Status::Processing => "Extracting",
            // Terminal jobs live in history, not the queue
            Status::Completed => "Completed",
            Status::Failed => "Failed",
        }
    }
}

/// Options supplied when enqueueing a new download
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Category to assign (None = uncategorized)
    #[serde(default)]
    pub category: Option<String>,

    /// Display name override (defaults to the NZB filename)
    #[serde(default)]
    pub name: Option<String>,
}
