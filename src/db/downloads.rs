//! Download queue CRUD and guarded status transitions.

use crate::error::{DatabaseError, Error, Result};
use crate::types::{DownloadId, Status};

use super::{Database, Download, NewDownload};

fn query_failed(context: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("{context}: {e}")))
}

const DOWNLOAD_COLUMNS: &str = "id, name, category, status, total_bytes, downloaded_bytes, \
     total_segments, done_segments, path, raw_nzb, password, error_msg, created_at, completed_at";

impl Database {
    /// Insert a new queued download, returning its id.
    pub async fn insert_download(&self, download: &NewDownload) -> Result<DownloadId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO downloads (
                name, category, status, total_bytes, total_segments,
                raw_nzb, password, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&download.name)
        .bind(&download.category)
        .bind(Status::Queued.to_i32())
        .bind(download.total_bytes)
        .bind(download.total_segments)
        .bind(&download.raw_nzb)
        .bind(&download.password)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("failed to insert download", e))?;

        Ok(DownloadId(result.last_insert_rowid()))
    }

    /// Get a download by ID
    pub async fn get_download(&self, id: DownloadId) -> Result<Option<Download>> {
        sqlx::query_as::<_, Download>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("failed to get download", e))
    }

    /// The oldest queued job, or None. Jobs are picked strictly FIFO by
    /// enqueue time.
    pub async fn next_queued(&self) -> Result<Option<Download>> {
        sqlx::query_as::<_, Download>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE status = ? \
             ORDER BY created_at ASC, id ASC LIMIT 1"
        ))
        .bind(Status::Queued.to_i32())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("failed to fetch next queued download", e))
    }

    /// All non-terminal jobs, FIFO order (the SABnzbd queue view).
    pub async fn list_queue(&self) -> Result<Vec<Download>> {
        sqlx::query_as::<_, Download>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE status IN (?, ?, ?) \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(Status::Queued.to_i32())
        .bind(Status::Downloading.to_i32())
        .bind(Status::Processing.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("failed to list queue", e))
    }

    /// All terminal jobs, newest first (the SABnzbd history view).
    pub async fn list_history(&self) -> Result<Vec<Download>> {
        sqlx::query_as::<_, Download>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE status IN (?, ?) \
             ORDER BY completed_at DESC, id DESC"
        ))
        .bind(Status::Completed.to_i32())
        .bind(Status::Failed.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("failed to list history", e))
    }

    /// Transition a job from one specific status to another.
    ///
    /// The update is guarded on the current status, so illegal transitions
    /// (including any transition out of a terminal state) are silent no-ops;
    /// the return value says whether the row actually moved.
    pub async fn transition_status(
        &self,
        id: DownloadId,
        from: Status,
        to: Status,
    ) -> Result<bool> {
        if !from.can_transition(to) {
            return Ok(false);
        }

        let result = sqlx::query("UPDATE downloads SET status = ? WHERE id = ? AND status = ?")
            .bind(to.to_i32())
            .bind(id)
            .bind(from.to_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("failed to transition status", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a job failed with a one-line error message.
    ///
    /// Idempotent: terminal jobs are left untouched, so a job cancelled by
    /// the user fails exactly once and later engine errors cannot overwrite
    /// the message.
    pub async fn mark_failed(&self, id: DownloadId, error_msg: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE downloads SET status = ?, error_msg = ?, completed_at = ? \
             WHERE id = ? AND status NOT IN (?, ?)",
        )
        .bind(Status::Failed.to_i32())
        .bind(error_msg)
        .bind(now)
        .bind(id)
        .bind(Status::Completed.to_i32())
        .bind(Status::Failed.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("failed to mark download failed", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a processing job completed.
    pub async fn mark_completed(&self, id: DownloadId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE downloads SET status = ?, completed_at = ? WHERE id = ? AND status = ?",
        )
        .bind(Status::Completed.to_i32())
        .bind(now)
        .bind(id)
        .bind(Status::Processing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("failed to mark download completed", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist the destination directory chosen for a job.
    pub async fn set_download_path(&self, id: DownloadId, path: &str) -> Result<()> {
        sqlx::query("UPDATE downloads SET path = ? WHERE id = ?")
            .bind(path)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("failed to set download path", e))?;
        Ok(())
    }

    /// Update progress counters. Values are absolute, so publications are
    /// monotonic as long as the engine's own counters are.
    pub async fn update_progress(
        &self,
        id: DownloadId,
        downloaded_bytes: u64,
        done_segments: u64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE downloads SET downloaded_bytes = ?, done_segments = ? WHERE id = ?",
        )
        .bind(downloaded_bytes as i64)
        .bind(done_segments as i64)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("failed to update progress", e))?;
        Ok(())
    }

    /// Revert jobs stuck in `downloading`/`processing` back to `queued`.
    ///
    /// Runs at startup and on VPN resume, so interrupted jobs are re-picked
    /// by the driver instead of lingering in a state no worker owns.
    pub async fn requeue_interrupted(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE downloads SET status = ?, downloaded_bytes = 0, done_segments = 0 \
             WHERE status IN (?, ?)",
        )
        .bind(Status::Queued.to_i32())
        .bind(Status::Downloading.to_i32())
        .bind(Status::Processing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("failed to requeue interrupted downloads", e))?;

        Ok(result.rows_affected())
    }

    /// Delete a download row outright (queue removal of a non-active job).
    pub async fn delete_download(&self, id: DownloadId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("failed to delete download", e))?;
        Ok(result.rows_affected() > 0)
    }
}
