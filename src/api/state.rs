//! Shared state handed to every API handler.

use std::sync::Arc;

use crate::config::Config;
use crate::db::{Database, RuntimeState};
use crate::downloader::Engine;
use crate::nntp::PoolManager;
use crate::vpn::VpnCoordinator;

/// Application state for the control plane
#[derive(Clone)]
pub struct AppState {
    /// Queue store
    pub db: Arc<Database>,
    /// Runtime state (paused flag, speed, extraction progress)
    pub state: Arc<RuntimeState>,
    /// Download engine
    pub engine: Arc<Engine>,
    /// NNTP pool manager (server tests, reconciliation)
    pub pools: Arc<PoolManager>,
    /// VPN coordinator
    pub vpn: Arc<VpnCoordinator>,
    /// Static configuration
    pub config: Arc<Config>,
}
