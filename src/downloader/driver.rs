//! Engine driver loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use super::Engine;

/// Fallback poll period when no wake arrives
const IDLE_TICK: Duration = Duration::from_secs(5);

impl Engine {
    /// The driver: alternate between draining the queue and sleeping on
    /// `wake-signal OR 5 s timer OR shutdown`.
    pub(super) async fn run(self: Arc<Self>) {
        info!("download engine started");

        loop {
            self.drain_queue().await;

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(IDLE_TICK) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        info!("download engine stopped");
    }

    /// Process queued jobs FIFO until the queue is empty, the engine pauses,
    /// or shutdown begins. One job at a time by design.
    pub(super) async fn drain_queue(self: &Arc<Self>) {
        loop {
            if self.state.is_paused() || self.shutdown.is_cancelled() {
                return;
            }

            let job = match self.db.next_queued().await {
                Ok(Some(job)) => job,
                Ok(None) => return,
                Err(e) => {
                    error!(error = %e, "failed to poll the queue");
                    return;
                }
            };

            self.process_job(job).await;
        }
    }
}
