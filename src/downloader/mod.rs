//! Download engine
//!
//! A single background driver pulls `queued` jobs strictly FIFO and
//! processes them one at a time. For each file in a job, segment fetches
//! fan out up to the configured parallelism with a strict join barrier
//! before assembly, first error wins, and the paused flag is consulted at
//! every dispatch site.
//!
//! Submodules:
//! - [`driver`] - the wake-or-timer loop
//! - [`job`] - one job: parse, fan out, assemble, hand off
//! - [`control`] - enqueue, cancel, remove, shutdown

mod control;
mod driver;
mod job;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::{Database, RuntimeState};
use crate::error::Result;
use crate::extraction::PostProcessor;
use crate::nntp::PoolManager;
use crate::types::DownloadId;

/// Fetches one article body by message-id.
///
/// The engine's only view of the NNTP stack; tests substitute scripted
/// fetchers here.
#[async_trait]
pub trait ArticleFetcher: Send + Sync {
    /// Fetch the article, honoring `cancel` at every wait site.
    async fn fetch_article(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
    ) -> Result<Vec<u8>>;
}

#[async_trait]
impl ArticleFetcher for PoolManager {
    async fn fetch_article(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
    ) -> Result<Vec<u8>> {
        Ok(PoolManager::fetch_article(self, cancel, message_id).await?)
    }
}

/// The download engine.
pub struct Engine {
    pub(crate) db: Arc<Database>,
    pub(crate) state: Arc<RuntimeState>,
    pub(crate) fetcher: Arc<dyn ArticleFetcher>,
    pub(crate) post_processor: Arc<dyn PostProcessor>,
    pub(crate) config: Arc<Config>,
    /// Coalescing wake signal: pending wakes collapse into one
    pub(crate) wake: Arc<Notify>,
    /// Engine scope; cancelling it cancels every job
    pub(crate) shutdown: CancellationToken,
    /// Per-job cancel handles, keyed by job id for external CancelDownload
    pub(crate) active_jobs: Mutex<HashMap<DownloadId, CancellationToken>>,
    /// Driver task handle, present while running
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Assemble an engine over its collaborators.
    pub fn new(
        db: Arc<Database>,
        state: Arc<RuntimeState>,
        fetcher: Arc<dyn ArticleFetcher>,
        post_processor: Arc<dyn PostProcessor>,
        config: Arc<Config>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            db,
            state,
            fetcher,
            post_processor,
            config,
            wake,
            shutdown: CancellationToken::new(),
            active_jobs: Mutex::new(HashMap::new()),
            driver: Mutex::new(None),
        }
    }

    /// Wake the driver (new job enqueued, VPN resumed, ...). Wakes coalesce;
    /// notifying an already-pending driver is a no-op.
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Spawn the background driver. Idempotent: a second call while the
    /// driver is alive does nothing.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.driver.lock().await;
        if let Some(handle) = guard.as_ref()
            && !handle.is_finished()
        {
            return;
        }

        let engine = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            engine.run().await;
        }));
    }

    /// Cancel the engine scope and wait for the driver to exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.wake.notify_one();

        if let Some(handle) = self.driver.lock().await.take() {
            let _ = handle.await;
        }
    }
}
