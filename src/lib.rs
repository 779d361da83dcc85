//! # nzbtunnel
//!
//! VPN-bound Usenet download agent with a SABnzbd-compatible control plane.
//!
//! nzbtunnel accepts NZB job descriptors from automation tools over HTTP,
//! fetches article bodies concurrently across pools of authenticated NNTP
//! connections pinned to a VPN network interface, decodes the yEnc
//! payloads, reassembles the original files, and extracts the resulting
//! archives into a completion directory. When the VPN interface disappears
//! the queue pauses and every pool is torn down; when it returns the pools
//! rebind to the new interface and interrupted jobs are re-queued.
//!
//! ## Quick Start
//!
//! ```no_run
//! use nzbtunnel::{Config, NzbTunnel, ServerConfig, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         servers: vec![ServerConfig {
//!             name: "primary".to_string(),
//!             host: "news.example.com".to_string(),
//!             port: 563,
//!             tls: true,
//!             username: Some("user".to_string()),
//!             password: Some("pass".to_string()),
//!             connections: 20,
//!             enabled: true,
//!         }],
//!         ..Default::default()
//!     };
//!
//!     let tunnel = NzbTunnel::new(config).await?;
//!     tunnel.start().await?;
//!     tunnel.spawn_api_server();
//!
//!     run_with_shutdown(tunnel).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// HTTP control plane (SABnzbd emulation + admin endpoints)
pub mod api;
/// Configuration types
pub mod config;
/// Queue store: SQLite persistence and runtime state
pub mod db;
/// Download engine
pub mod downloader;
/// Error types
pub mod error;
/// Archive extraction and post-processing
pub mod extraction;
/// NNTP client layer (dialer, connection, pools, manager)
pub mod nntp;
/// NZB descriptor parser
pub mod nzb;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;
/// VPN coordinator (interface monitor, tunnel lifecycle)
pub mod vpn;
/// yEnc codec
pub mod yenc;

// Re-export commonly used types
pub use config::{Config, ServerConfig, VpnConfig, VpnMode};
pub use db::Database;
pub use downloader::{ArticleFetcher, Engine};
pub use error::{ApiError, Error, NntpError, Result, ToHttpStatus, YencError};
pub use nzb::{NzbPlan, parse_nzb};
pub use types::{DownloadId, DownloadOptions, Status};

use std::sync::Arc;

use tokio::sync::Notify;

use crate::db::RuntimeState;
use crate::extraction::ArchiveExtractor;
use crate::nntp::PoolManager;
use crate::vpn::VpnCoordinator;

/// The assembled download agent: queue store, pool manager, VPN
/// coordinator, engine, and control plane wiring.
pub struct NzbTunnel {
    db: Arc<Database>,
    state: Arc<RuntimeState>,
    pools: Arc<PoolManager>,
    vpn: Arc<VpnCoordinator>,
    engine: Arc<Engine>,
    config: Arc<Config>,
}

impl NzbTunnel {
    /// Initialize every component: validate configuration, open the
    /// database, seed servers, and recover jobs a previous session left
    /// in flight.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.incomplete_dir)
            .await
            .map_err(Error::Io)?;
        tokio::fs::create_dir_all(&config.download.complete_dir)
            .await
            .map_err(Error::Io)?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        db.seed_servers(&config.servers).await?;

        let requeued = db.requeue_interrupted().await?;
        if requeued > 0 {
            tracing::info!(requeued, "recovered jobs from an unclean shutdown");
        }

        let state = Arc::new(RuntimeState::new());
        let pools = Arc::new(PoolManager::new(""));
        let wake = Arc::new(Notify::new());

        let config = Arc::new(config);
        let vpn = Arc::new(VpnCoordinator::new(
            &config.vpn,
            Arc::clone(&db),
            Arc::clone(&state),
            Arc::clone(&pools),
            Arc::clone(&wake),
        )?);

        let post_processor = Arc::new(ArchiveExtractor::new(
            config.download.complete_dir.clone(),
            Arc::clone(&state),
        ));

        let engine = Arc::new(Engine::new(
            Arc::clone(&db),
            Arc::clone(&state),
            Arc::clone(&pools) as Arc<dyn ArticleFetcher>,
            post_processor,
            Arc::clone(&config),
            Arc::clone(&wake),
        ));

        Ok(Self {
            db,
            state,
            pools,
            vpn,
            engine,
            config,
        })
    }

    /// Start the engine driver and the VPN coordinator.
    ///
    /// With the VPN off, pools are populated immediately; otherwise the
    /// coordinator populates them on the first Up edge.
    pub async fn start(&self) -> Result<()> {
        self.engine.start().await;
        self.vpn.start().await?;

        if self.config.vpn.mode == VpnMode::Off {
            self.pools.update_servers(self.db.enabled_servers().await?).await;
            self.engine.notify();
        }

        Ok(())
    }

    /// Spawn the HTTP control plane in a background task.
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let app_state = self.app_state();
        tokio::spawn(async move { api::start_api_server(app_state).await })
    }

    /// Application state for embedding the router elsewhere (tests, custom
    /// servers).
    pub fn app_state(&self) -> api::AppState {
        api::AppState {
            db: Arc::clone(&self.db),
            state: Arc::clone(&self.state),
            engine: Arc::clone(&self.engine),
            pools: Arc::clone(&self.pools),
            vpn: Arc::clone(&self.vpn),
            config: Arc::clone(&self.config),
        }
    }

    /// The download engine (enqueue, cancel, remove).
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// The queue store.
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Graceful shutdown: cancel the engine scope, stop the VPN
    /// coordinator (awaiting its reconnect worker), close every pool,
    /// then close the database.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("shutting down");

        self.engine.stop().await;
        self.vpn.stop().await;
        self.pools.close_all().await;
        self.db.close().await;

        Ok(())
    }
}

/// Run the agent until a termination signal arrives, then shut down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Other platforms:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(tunnel: NzbTunnel) -> Result<()> {
    wait_for_signal().await;
    tunnel.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration can fail in restricted environments (containers)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
            } else {
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
            } else {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
}
