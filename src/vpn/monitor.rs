//! Network interface up/down monitor.
//!
//! Polls a named interface every 2 s and emits edge-triggered events on
//! transitions. The probe is injectable so tests can flip interface state
//! without touching the host network stack.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Poll cadence for interface state
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// `IFF_UP` bit in `/sys/class/net/<if>/flags`
const IFF_UP: u64 = 0x1;

/// Edge-triggered interface transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceEvent {
    /// The interface exists and is flagged up; carries the interface name
    Up(String),
    /// The interface disappeared or lost its up flag
    Down,
}

/// Probe returning whether a named interface exists and is up
pub type Probe = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Whether `interface` exists and is administratively up.
///
/// Reads the interface flags from sysfs; a missing interface reads as down.
pub fn interface_is_up(interface: &str) -> bool {
    let path = format!("/sys/class/net/{interface}/flags");
    let Ok(raw) = std::fs::read_to_string(path) else {
        return false;
    };

    let trimmed = raw.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    u64::from_str_radix(hex, 16)
        .map(|flags| flags & IFF_UP != 0)
        .unwrap_or(false)
}

/// Periodic monitor for one interface.
pub struct InterfaceMonitor {
    interface: String,
    up: Arc<AtomicBool>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl InterfaceMonitor {
    /// Start monitoring `interface`, sending transitions to `events`.
    ///
    /// The monitor assumes "down" until the first poll, so an interface that
    /// is already up when monitoring starts fires an [`InterfaceEvent::Up`]
    /// on that first poll.
    pub fn spawn(
        interface: impl Into<String>,
        probe: Probe,
        events: mpsc::Sender<InterfaceEvent>,
    ) -> Self {
        let interface = interface.into();
        let up = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        let handle = {
            let interface = interface.clone();
            let up = Arc::clone(&up);
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                info!(interface = %interface, "interface monitor started");
                let mut ticker = tokio::time::interval(POLL_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                let mut last = false;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.cancelled() => {
                            debug!(interface = %interface, "interface monitor stopped");
                            return;
                        }
                    }

                    let current = probe(&interface);
                    up.store(current, Ordering::SeqCst);

                    if current != last {
                        last = current;
                        let event = if current {
                            InterfaceEvent::Up(interface.clone())
                        } else {
                            InterfaceEvent::Down
                        };
                        info!(interface = %interface, up = current, "interface transition");
                        if events.send(event).await.is_err() {
                            // Receiver gone; monitoring is pointless now
                            return;
                        }
                    }
                }
            })
        };

        Self {
            interface,
            up,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// The monitored interface name
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Most recently observed state
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    /// Stop polling. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}
