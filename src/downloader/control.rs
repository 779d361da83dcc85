//! External control surface: enqueue, cancel, remove.

use std::sync::Arc;

use tracing::info;

use crate::db::NewDownload;
use crate::error::{Error, Result};
use crate::nzb;
use crate::types::{DownloadId, DownloadOptions, Status};
use crate::utils;

use super::Engine;

impl Engine {
    /// Validate and enqueue an NZB, waking the driver.
    ///
    /// The NZB is parsed up front so broken descriptors are rejected at the
    /// control plane instead of failing later inside the engine; totals and
    /// the archive password are precomputed from the plan.
    pub async fn add_nzb(
        self: &Arc<Self>,
        raw_nzb: Vec<u8>,
        options: DownloadOptions,
    ) -> Result<DownloadId> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let plan = nzb::parse_nzb(&raw_nzb)?;

        let name = options
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| plan.files[0].filename());
        let name = utils::sanitize_job_name(&name);

        let download = NewDownload {
            name: name.clone(),
            category: options.category,
            total_bytes: plan.total_bytes() as i64,
            total_segments: plan.total_segments() as i64,
            password: plan.password().map(str::to_string),
            raw_nzb,
        };

        let id = self.db.insert_download(&download).await?;
        info!(download_id = id.0, name = %name, "download enqueued");

        self.notify();
        Ok(id)
    }

    /// Cancel a job by id.
    ///
    /// The failure record is written *before* the per-job scope is cut, so a
    /// re-scheduling race cannot resurrect the job: by the time the engine
    /// observes cancellation the row is already terminal.
    pub async fn cancel_download(&self, id: DownloadId) -> Result<bool> {
        let marked = self.db.mark_failed(id, "cancelled by user").await?;

        if let Some(token) = self.active_jobs.lock().await.get(&id) {
            token.cancel();
        }

        if marked {
            info!(download_id = id.0, "download cancelled");
        }
        Ok(marked)
    }

    /// Remove a job from the queue: cancel it when active, delete the row
    /// when it never started.
    pub async fn remove_from_queue(&self, id: DownloadId) -> Result<bool> {
        let Some(job) = self.db.get_download(id).await? else {
            return Ok(false);
        };

        match job.status() {
            Status::Queued => self.db.delete_download(id).await,
            Status::Downloading | Status::Processing => self.cancel_download(id).await,
            // Terminal rows live in history; leave them there
            Status::Completed | Status::Failed => Ok(false),
        }
    }
}
