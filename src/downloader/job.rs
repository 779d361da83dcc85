//! One job: parse the NZB, fan out segment fetches per file, assemble in
//! ordinal order, hand off to post-processing.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{Download, RuntimeState};
use crate::error::{Error, Result};
use crate::nzb::{self, NzbFile};
use crate::types::{DownloadId, Status};
use crate::utils;
use crate::yenc;

use super::Engine;

/// Persist progress every this many completed segments
const PROGRESS_FLUSH_EVERY: u64 = 10;

/// How a file's fan-out ended
enum FileOutcome {
    /// All segments fetched and the file was assembled
    Completed,
    /// The paused flag interrupted dispatch; the file was not assembled
    Paused,
}

/// Job-level counters shared by the segment tasks and the speed sampler
#[derive(Default)]
struct JobCounters {
    downloaded_bytes: AtomicU64,
    done_segments: AtomicU64,
}

impl Engine {
    /// Drive one job to a terminal state (or leave it for resume on pause).
    pub(super) async fn process_job(self: &Arc<Self>, job: Download) {
        let id = job.download_id();

        if !self
            .transition_or_log(id, Status::Queued, Status::Downloading)
            .await
        {
            return;
        }

        info!(download_id = id.0, name = %job.name, "job started");

        let plan = match nzb::parse_nzb(&job.raw_nzb) {
            Ok(plan) => plan,
            Err(e) => {
                self.fail_job(id, &e.to_string()).await;
                return;
            }
        };

        if let Err(e) = self.preflight(&job).await {
            self.fail_job(id, &e.to_string()).await;
            return;
        }

        let dest = self
            .config
            .download
            .incomplete_dir
            .join(utils::sanitize_job_name(&job.name));
        if let Err(e) = tokio::fs::create_dir_all(&dest).await {
            self.fail_job(id, &format!("failed to create job directory: {e}"))
                .await;
            return;
        }
        if let Err(e) = self
            .db
            .set_download_path(id, &dest.to_string_lossy())
            .await
        {
            self.fail_job(id, &e.to_string()).await;
            return;
        }

        // Per-job cancellable scope, keyed for external CancelDownload
        let cancel = self.shutdown.child_token();
        self.active_jobs.lock().await.insert(id, cancel.clone());

        let counters = Arc::new(JobCounters::default());
        let sampler_stop = CancellationToken::new();
        let sampler = spawn_speed_sampler(
            Arc::clone(&self.state),
            Arc::clone(&counters),
            sampler_stop.clone(),
        );

        let mut job_error: Option<Error> = None;
        let mut paused = false;

        for file in &plan.files {
            if self.state.is_paused() {
                paused = true;
                break;
            }

            match self.fetch_file(id, &cancel, file, &dest, &counters).await {
                Ok(FileOutcome::Completed) => {}
                Ok(FileOutcome::Paused) => {
                    paused = true;
                    break;
                }
                Err(e) => {
                    job_error = Some(e);
                    break;
                }
            }
        }

        self.active_jobs.lock().await.remove(&id);
        sampler_stop.cancel();
        let _ = sampler.await;
        self.state.set_speed_bps(0);

        let _ = self
            .db
            .update_progress(
                id,
                counters.downloaded_bytes.load(Ordering::Relaxed),
                counters.done_segments.load(Ordering::Relaxed),
            )
            .await;

        match job_error {
            Some(e) if e.is_cancelled() && self.shutdown.is_cancelled() => {
                // Process shutdown, not a user cancel: leave the row in
                // `downloading` so next-session recovery re-queues it
                info!(download_id = id.0, "job interrupted by shutdown");
            }
            Some(e) if e.is_cancelled() => {
                // CancelDownload already wrote the message before cutting
                // the scope; this write is the idempotent no-op
                self.fail_job(id, "cancelled by user").await;
            }
            Some(e) if self.state.is_paused() => {
                // In-flight fetches were torn down by the VPN outage. The
                // job is not failed: the resume path re-queues it.
                warn!(
                    download_id = id.0,
                    error = %e,
                    "job interrupted by pause; awaiting resume"
                );
            }
            Some(e) => {
                self.fail_job(id, &e.to_string()).await;
            }
            None if paused => {
                // Status stays as-is; the queue store decides on resume
                info!(download_id = id.0, "job paused before completion");
            }
            None => {
                self.finish_job(id).await;
            }
        }
    }

    /// Hand a fully-assembled job to the post-processor and record the
    /// terminal state it produces.
    async fn finish_job(self: &Arc<Self>, id: DownloadId) {
        if !self
            .transition_or_log(id, Status::Downloading, Status::Processing)
            .await
        {
            return;
        }

        let record = match self.db.get_download(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(download_id = id.0, "job vanished before post-processing");
                return;
            }
            Err(e) => {
                self.fail_job(id, &e.to_string()).await;
                return;
            }
        };

        match self.post_processor.process(&record).await {
            Ok(final_dir) => {
                let _ = self.db.mark_completed(id).await;
                info!(
                    download_id = id.0,
                    path = %final_dir.display(),
                    "job completed"
                );
            }
            Err(e) => {
                self.fail_job(id, &format!("post-processing failed: {e}")).await;
            }
        }
        self.state.clear_extraction_progress(id);
    }

    /// Free-space preflight against the job's total size.
    async fn preflight(&self, job: &Download) -> Result<()> {
        if self.config.download.skip_space_check {
            return Ok(());
        }

        let root = self.config.download.incomplete_dir.clone();
        tokio::fs::create_dir_all(&root).await.map_err(Error::Io)?;

        let available = utils::get_available_space(&root).map_err(Error::Io)?;
        if available < job.total_bytes as u64 {
            return Err(Error::InsufficientSpace {
                required: job.total_bytes as u64,
                available,
            });
        }

        Ok(())
    }

    /// Download every segment of one file with bounded parallelism, then
    /// assemble it.
    ///
    /// First error wins: once any segment fails, dispatching stops and the
    /// in-flight segments drain through the join barrier. Writes happen in
    /// strict ordinal order regardless of completion order.
    async fn fetch_file(
        self: &Arc<Self>,
        id: DownloadId,
        cancel: &CancellationToken,
        file: &NzbFile,
        dest: &Path,
        counters: &Arc<JobCounters>,
    ) -> Result<FileOutcome> {
        let segments = file.sorted_segments()?;
        let count = segments.len();
        let filename = utils::sanitize_job_name(&file.filename());

        debug!(
            download_id = id.0,
            file = %filename,
            segments = count,
            "fetching file"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.download.segment_parallelism));
        let first_error: Arc<std::sync::Mutex<Option<Error>>> =
            Arc::new(std::sync::Mutex::new(None));
        let mut tasks: JoinSet<Option<(usize, Vec<u8>)>> = JoinSet::new();
        let mut paused = false;

        for (index, segment) in segments.iter().enumerate() {
            if self.state.is_paused() {
                paused = true;
                break;
            }
            if lock_error(&first_error).is_some() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        // The semaphore is never closed; treat it like
                        // cancellation if it somehow is
                        Err(_) => break,
                    }
                }
                _ = cancel.cancelled() => {
                    set_first_error(&first_error, Error::Cancelled);
                    break;
                }
            };

            let message_id = segment.message_id.clone();
            let ordinal = segment.number;
            let fetcher = Arc::clone(&self.fetcher);
            let db = Arc::clone(&self.db);
            let cancel = cancel.clone();
            let first_error = Arc::clone(&first_error);
            let counters = Arc::clone(counters);

            tasks.spawn(async move {
                let _permit = permit;

                let result = async {
                    let body = fetcher.fetch_article(&cancel, &message_id).await?;
                    let decoded = yenc::decode(&body)?;
                    Ok::<_, Error>(decoded.data)
                }
                .await;

                match result {
                    Ok(data) => {
                        counters
                            .downloaded_bytes
                            .fetch_add(data.len() as u64, Ordering::Relaxed);
                        let done = counters.done_segments.fetch_add(1, Ordering::Relaxed) + 1;
                        if done % PROGRESS_FLUSH_EVERY == 0 {
                            let bytes = counters.downloaded_bytes.load(Ordering::Relaxed);
                            let _ = db.update_progress(id, bytes, done).await;
                        }
                        Some((index, data))
                    }
                    Err(e) => {
                        debug!(message_id = %message_id, ordinal, error = %e, "segment failed");
                        set_first_error(&first_error, e);
                        None
                    }
                }
            });
        }

        // Strict join barrier: every dispatched segment resolves before the
        // file is judged
        let mut slots: Vec<Option<Vec<u8>>> = Vec::with_capacity(count);
        slots.resize_with(count, || None);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some((index, data))) => slots[index] = Some(data),
                Ok(None) => {}
                Err(e) => {
                    set_first_error(
                        &first_error,
                        Error::Other(format!("segment task panicked: {e}")),
                    );
                }
            }
        }

        if let Some(error) = take_first_error(&first_error) {
            return Err(error);
        }
        if paused {
            return Ok(FileOutcome::Paused);
        }

        let bytes = counters.downloaded_bytes.load(Ordering::Relaxed);
        let done = counters.done_segments.load(Ordering::Relaxed);
        self.db.update_progress(id, bytes, done).await?;

        self.assemble_file(&segments, slots, &dest.join(&filename), &filename)
            .await?;

        info!(download_id = id.0, file = %filename, "file assembled");
        Ok(FileOutcome::Completed)
    }

    /// Write decoded payloads in strict ordinal order.
    async fn assemble_file(
        &self,
        segments: &[&crate::nzb::NzbSegment],
        slots: Vec<Option<Vec<u8>>>,
        path: &Path,
        filename: &str,
    ) -> Result<()> {
        let mut output = tokio::fs::File::create(path).await.map_err(Error::Io)?;

        for (segment, slot) in segments.iter().zip(slots) {
            let Some(data) = slot else {
                return Err(Error::Other(format!(
                    "missing segment {} for \"{filename}\"",
                    segment.number
                )));
            };
            output.write_all(&data).await.map_err(Error::Io)?;
        }

        output.flush().await.map_err(Error::Io)?;
        Ok(())
    }

    /// Guarded transition with logging; false means the row did not move.
    async fn transition_or_log(&self, id: DownloadId, from: Status, to: Status) -> bool {
        match self.db.transition_status(id, from, to).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(
                    download_id = id.0,
                    ?from,
                    ?to,
                    "status transition skipped; row moved underneath"
                );
                false
            }
            Err(e) => {
                error!(download_id = id.0, error = %e, "status transition failed");
                false
            }
        }
    }

    /// Mark a job failed (idempotent; terminal rows keep their message).
    async fn fail_job(&self, id: DownloadId, message: &str) {
        match self.db.mark_failed(id, message).await {
            Ok(true) => warn!(download_id = id.0, error = message, "job failed"),
            Ok(false) => {}
            Err(e) => error!(download_id = id.0, error = %e, "failed to record job failure"),
        }
    }
}

fn lock_error(slot: &std::sync::Mutex<Option<Error>>) -> Option<()> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .as_ref()
        .map(|_| ())
}

fn set_first_error(slot: &std::sync::Mutex<Option<Error>>, error: Error) {
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if guard.is_none() {
        *guard = Some(error);
    }
}

fn take_first_error(slot: &std::sync::Mutex<Option<Error>>) -> Option<Error> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

/// Publish `current − last` bytes once per second while the job runs.
fn spawn_speed_sampler(
    state: Arc<RuntimeState>,
    counters: Arc<JobCounters>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = counters.downloaded_bytes.load(Ordering::Relaxed);
                    state.set_speed_bps(now.saturating_sub(last));
                    last = now;
                }
                _ = stop.cancelled() => return,
            }
        }
    })
}
