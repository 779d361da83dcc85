//! Runtime state owned by the queue store.
//!
//! The paused flag lives here - not in the engine - because the queue store
//! is the authority on whether fetching may proceed. The VPN coordinator is
//! its only writer; the engine driver and every segment dispatch site read
//! it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{DatabaseError, Error, Result};
use crate::types::DownloadId;

use super::Database;

/// Key for the persisted VPN auto-connect flag
const KEY_VPN_AUTO_CONNECT: &str = "vpn_auto_connect";

/// In-memory runtime state shared across the engine, coordinator, and API.
#[derive(Debug, Default)]
pub struct RuntimeState {
    /// Level-triggered pause predicate; true while the VPN is down
    paused: AtomicBool,
    /// Current download speed in bytes/second, published by the speed sampler
    speed_bps: AtomicU64,
    /// Whether the VPN coordinator currently considers the tunnel up
    vpn_connected: AtomicBool,
    /// The interface the coordinator is currently monitoring
    vpn_interface: Mutex<String>,
    /// Extraction progress per job: id → (percent, current file)
    extraction: Mutex<HashMap<DownloadId, (f32, String)>>,
}

impl RuntimeState {
    /// Create state with everything cleared (unpaused, no speed, no VPN).
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the engine is paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Flip the paused flag; the VPN coordinator is the only caller.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Current speed in bytes/second
    pub fn speed_bps(&self) -> u64 {
        self.speed_bps.load(Ordering::Relaxed)
    }

    /// Publish a new speed sample
    pub fn set_speed_bps(&self, speed: u64) {
        self.speed_bps.store(speed, Ordering::Relaxed);
    }

    /// Whether the tunnel is up
    pub fn vpn_connected(&self) -> bool {
        self.vpn_connected.load(Ordering::SeqCst)
    }

    /// Record tunnel state and the interface it rides on.
    pub fn set_vpn(&self, connected: bool, interface: &str) {
        self.vpn_connected.store(connected, Ordering::SeqCst);
        if let Ok(mut guard) = self.vpn_interface.lock() {
            *guard = interface.to_string();
        }
    }

    /// The interface currently monitored (empty when none)
    pub fn vpn_interface(&self) -> String {
        self.vpn_interface
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Publish extraction progress for a processing job.
    pub fn set_extraction_progress(&self, id: DownloadId, percent: f32, current_file: &str) {
        if let Ok(mut map) = self.extraction.lock() {
            map.insert(id, (percent, current_file.to_string()));
        }
    }

    /// Extraction progress for a job, if any
    pub fn extraction_progress(&self, id: DownloadId) -> Option<(f32, String)> {
        self.extraction
            .lock()
            .ok()
            .and_then(|map| map.get(&id).cloned())
    }

    /// Drop extraction progress once a job leaves `processing`.
    pub fn clear_extraction_progress(&self, id: DownloadId) {
        if let Ok(mut map) = self.extraction.lock() {
            map.remove(&id);
        }
    }
}

impl Database {
    /// Whether managed-mode VPN should auto-connect at startup.
    ///
    /// Defaults to true; set to false only when the user explicitly
    /// disconnected in a prior session.
    pub async fn vpn_auto_connect(&self) -> Result<bool> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM app_state WHERE key = ?")
                .bind(KEY_VPN_AUTO_CONNECT)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "failed to read auto-connect flag: {e}"
                    )))
                })?;

        Ok(value.as_deref() != Some("false"))
    }

    /// Persist the auto-connect flag across sessions.
    pub async fn set_vpn_auto_connect(&self, auto_connect: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO app_state (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(KEY_VPN_AUTO_CONNECT)
        .bind(if auto_connect { "true" } else { "false" })
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "failed to persist auto-connect flag: {e}"
            )))
        })?;

        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::super::test_helpers::memory_db;
    use super::*;

    #[test]
    fn paused_flag_defaults_to_running() {
        let state = RuntimeState::new();
        assert!(!state.is_paused());

        state.set_paused(true);
        assert!(state.is_paused());
        state.set_paused(false);
        assert!(!state.is_paused());
    }

    #[test]
    fn vpn_state_tracks_interface_name() {
        let state = RuntimeState::new();
        assert!(!state.vpn_connected());
        assert_eq!(state.vpn_interface(), "");

        state.set_vpn(true, "wg0");
        assert!(state.vpn_connected());
        assert_eq!(state.vpn_interface(), "wg0");

        state.set_vpn(false, "");
        assert!(!state.vpn_connected());
    }

    #[test]
    fn extraction_progress_is_per_job_and_clearable() {
        let state = RuntimeState::new();
        let id = DownloadId::new(3);

        assert_eq!(state.extraction_progress(id), None);
        state.set_extraction_progress(id, 40.0, "archive.part01.rar");
        assert_eq!(
            state.extraction_progress(id),
            Some((40.0, "archive.part01.rar".to_string()))
        );

        state.clear_extraction_progress(id);
        assert_eq!(state.extraction_progress(id), None);
    }

    #[tokio::test]
    async fn auto_connect_defaults_to_true_and_persists() {
        let db = memory_db().await;
        assert!(db.vpn_auto_connect().await.unwrap());

        db.set_vpn_auto_connect(false).await.unwrap();
        assert!(!db.vpn_auto_connect().await.unwrap());

        db.set_vpn_auto_connect(true).await.unwrap();
        assert!(db.vpn_auto_connect().await.unwrap());
    }
}
