//! VPN coordinator
//!
//! Couples tunnel state to the download pipeline:
//! - **passive** mode monitors a pre-existing interface by name;
//! - **managed** mode owns a [`TunnelConnector`] and brings the tunnel up
//!   itself, with a bounded reconnect loop.
//!
//! On every Down edge the coordinator pauses the queue and closes all
//! connection pools; on every Up edge it rebinds the pool manager to the
//! new interface, refreshes the server list, re-queues interrupted jobs,
//! unpauses, and wakes the engine.

pub mod connector;
pub mod monitor;

pub use connector::{TunnelConnector, TunnelStatus, WireGuardConnector};
pub use monitor::{InterfaceEvent, InterfaceMonitor, Probe};

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{VpnConfig, VpnMode};
use crate::db::{Database, RuntimeState};
use crate::error::{Error, Result};
use crate::nntp::PoolManager;

/// Maximum managed-mode connect attempts before giving up
const RECONNECT_ATTEMPTS: u32 = 10;

/// First reconnect backoff; doubles per attempt
const RECONNECT_BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Reconnect backoff ceiling
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Owns the interface monitor and (in managed mode) the tunnel lifecycle.
pub struct VpnCoordinator {
    mode: VpnMode,
    passive_interface: String,
    db: Arc<Database>,
    state: Arc<RuntimeState>,
    pools: Arc<PoolManager>,
    engine_wake: Arc<Notify>,
    connector: Option<Arc<dyn TunnelConnector>>,
    probe: Probe,
    monitor: Mutex<Option<InterfaceMonitor>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl VpnCoordinator {
    /// Build a coordinator from configuration.
    ///
    /// Managed mode locates the tunnel tool immediately so a missing binary
    /// fails startup instead of the first reconnect.
    pub fn new(
        config: &VpnConfig,
        db: Arc<Database>,
        state: Arc<RuntimeState>,
        pools: Arc<PoolManager>,
        engine_wake: Arc<Notify>,
    ) -> Result<Self> {
        let connector: Option<Arc<dyn TunnelConnector>> = match config.mode {
            VpnMode::Managed => {
                let path = config.config_path.as_ref().ok_or_else(|| Error::Config {
                    message: "managed VPN mode requires a tunnel config path".to_string(),
                    key: Some("vpn.config_path".to_string()),
                })?;
                Some(Arc::new(WireGuardConnector::new(path)?))
            }
            _ => None,
        };

        let probe: Probe = Arc::new(|name: &str| monitor::interface_is_up(name));

        Ok(Self::with_parts(
            config.mode,
            config.interface.clone(),
            connector,
            probe,
            db,
            state,
            pools,
            engine_wake,
        ))
    }

    /// Assemble a coordinator from explicit parts (tests inject a mock
    /// connector and a switchable probe here).
    #[allow(clippy::too_many_arguments)]
    pub fn with_parts(
        mode: VpnMode,
        passive_interface: String,
        connector: Option<Arc<dyn TunnelConnector>>,
        probe: Probe,
        db: Arc<Database>,
        state: Arc<RuntimeState>,
        pools: Arc<PoolManager>,
        engine_wake: Arc<Notify>,
    ) -> Self {
        Self {
            mode,
            passive_interface,
            db,
            state,
            pools,
            engine_wake,
            connector,
            probe,
            monitor: Mutex::new(None),
            event_task: Mutex::new(None),
            reconnect_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Coordinator mode
    pub fn mode(&self) -> VpnMode {
        self.mode
    }

    /// Whether the monitored interface is currently up.
    pub async fn is_up(&self) -> bool {
        match self.monitor.lock().await.as_ref() {
            Some(monitor) => monitor.is_up(),
            None => false,
        }
    }

    /// Start the coordinator.
    ///
    /// Passive and managed modes begin paused: the queue only opens once the
    /// monitor observes the interface up. Managed mode connects immediately
    /// unless the user explicitly disconnected in a prior session.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        match self.mode {
            VpnMode::Off => Ok(()),
            VpnMode::Passive => {
                self.state.set_paused(true);
                self.install_monitor(&self.passive_interface.clone()).await;
                Ok(())
            }
            VpnMode::Managed => {
                self.state.set_paused(true);
                if self.db.vpn_auto_connect().await? {
                    self.spawn_reconnect().await;
                } else {
                    info!("VPN auto-connect disabled by a prior session; staying down");
                }
                Ok(())
            }
        }
    }

    /// Stop the coordinator.
    ///
    /// Cancels any in-progress connect, waits for the reconnect worker to
    /// exit, and only then disconnects - otherwise a racing connect could
    /// re-create the tunnel after shutdown.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        if let Some(handle) = self.reconnect_task.lock().await.take() {
            let _ = handle.await;
        }

        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.stop().await;
        }
        if let Some(handle) = self.event_task.lock().await.take() {
            handle.abort();
        }

        if let Some(connector) = &self.connector {
            let _ = connector.disconnect().await;
        }
    }

    /// User-initiated connect (managed mode): re-enable auto-connect and
    /// start the reconnect worker.
    pub async fn user_connect(self: &Arc<Self>) -> Result<()> {
        if self.mode != VpnMode::Managed {
            return Err(Error::Vpn(
                "connect is only available in managed mode".to_string(),
            ));
        }

        self.db.set_vpn_auto_connect(true).await?;
        self.spawn_reconnect().await;
        Ok(())
    }

    /// User-initiated disconnect: persist the choice so the next session
    /// does not auto-connect, tear the tunnel down, and pause the queue.
    pub async fn user_disconnect(&self) -> Result<()> {
        if self.mode != VpnMode::Managed {
            return Err(Error::Vpn(
                "disconnect is only available in managed mode".to_string(),
            ));
        }

        self.db.set_vpn_auto_connect(false).await?;

        if let Some(handle) = self.reconnect_task.lock().await.take() {
            handle.abort();
        }
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.stop().await;
        }

        self.state.set_paused(true);
        self.state.set_vpn(false, "");
        self.pools.close_all().await;

        if let Some(connector) = &self.connector {
            connector.disconnect().await?;
        }

        Ok(())
    }

    /// Install an interface monitor and its event consumer, replacing any
    /// previous pair.
    ///
    /// Returns a boxed future (rather than `async fn`) so the compiler does
    /// not need to inline this method's hidden return type while checking
    /// the `reconnect_loop` / `handle_event` / `spawn_reconnect` call cycle
    /// for `Send`.
    fn install_monitor<'a>(
        self: &'a Arc<Self>,
        interface: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if let Some(previous) = self.monitor.lock().await.take() {
                previous.stop().await;
            }
            if let Some(previous) = self.event_task.lock().await.take() {
                previous.abort();
            }

            let (tx, mut rx) = mpsc::channel(8);
            let monitor = InterfaceMonitor::spawn(interface, Arc::clone(&self.probe), tx);
            *self.monitor.lock().await = Some(monitor);

            let coordinator = Arc::clone(self);
            let handle = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    coordinator.handle_event(event).await;
                }
            });
            *self.event_task.lock().await = Some(handle);
        })
    }

    /// React to one interface transition.
    async fn handle_event(self: &Arc<Self>, event: InterfaceEvent) {
        match event {
            InterfaceEvent::Up(interface) => {
                info!(interface = %interface, "VPN up: rebinding pools and resuming queue");

                self.pools.set_interface(&interface).await;
                match self.db.enabled_servers().await {
                    Ok(servers) => self.pools.update_servers(servers).await,
                    Err(e) => error!(error = %e, "failed to load servers on VPN up"),
                }

                // Jobs interrupted by the outage revert to queued so the
                // driver re-picks them.
                if let Err(e) = self.db.requeue_interrupted().await {
                    error!(error = %e, "failed to requeue interrupted jobs");
                }

                self.state.set_vpn(true, &interface);
                self.state.set_paused(false);
                self.engine_wake.notify_one();
            }
            InterfaceEvent::Down => {
                warn!("VPN down: pausing queue and closing pools");

                self.state.set_paused(true);
                let interface = self.state.vpn_interface();
                self.state.set_vpn(false, &interface);
                self.pools.close_all().await;

                if self.mode == VpnMode::Managed {
                    self.spawn_reconnect().await;
                }
            }
        }
    }

    /// Start the reconnect worker unless one is already running.
    async fn spawn_reconnect(self: &Arc<Self>) {
        let mut guard = self.reconnect_task.lock().await;
        if let Some(handle) = guard.as_ref()
            && !handle.is_finished()
        {
            return;
        }

        let coordinator = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            coordinator.reconnect_loop().await;
        }));
    }

    /// Up to [`RECONNECT_ATTEMPTS`] connect attempts with exponential
    /// backoff (5 s doubling, capped at 60 s, plus jitter).
    async fn reconnect_loop(self: Arc<Self>) {
        let Some(connector) = self.connector.clone() else {
            return;
        };

        for attempt in 1..=RECONNECT_ATTEMPTS {
            match connector.connect(&self.shutdown).await {
                Ok(interface) => {
                    info!(interface = %interface, attempt, "tunnel connected");
                    self.install_monitor(&interface).await;
                    return;
                }
                Err(Error::Cancelled) => return,
                Err(e) => {
                    warn!(attempt, error = %e, "tunnel connect failed");
                }
            }

            if attempt == RECONNECT_ATTEMPTS {
                break;
            }

            let backoff = RECONNECT_BACKOFF_BASE
                .saturating_mul(1 << (attempt - 1))
                .min(RECONNECT_BACKOFF_CAP);
            let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 10);
            let delay = backoff + Duration::from_millis(jitter_ms);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => return,
            }
        }

        error!(
            attempts = RECONNECT_ATTEMPTS,
            "giving up on tunnel reconnect; queue stays paused"
        );
    }
}
