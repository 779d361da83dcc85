//! Tunnel connector contract and the wg-quick reference implementation.
//!
//! In managed mode the coordinator owns a [`TunnelConnector`] that brings
//! the tunnel up and down by invoking an external userland tool. The
//! contract is deliberately small: connect (returning the interface name),
//! disconnect, and a status probe.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};

use super::monitor::interface_is_up;

/// Tunnel state as reported by a connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelStatus {
    /// The tunnel interface exists and is up
    Connected {
        /// Interface name the tunnel rides on
        interface: String,
    },
    /// No tunnel
    Disconnected,
}

/// Brings a VPN tunnel up and down.
#[async_trait]
pub trait TunnelConnector: Send + Sync {
    /// Bring the tunnel up, returning the interface name it created.
    ///
    /// Cancellation must abort a connect in progress; a cancelled connect
    /// returns [`Error::Cancelled`] and leaves no half-created tunnel.
    async fn connect(&self, cancel: &CancellationToken) -> Result<String>;

    /// Tear the tunnel down. Best-effort; safe to call when already down.
    async fn disconnect(&self) -> Result<()>;

    /// Current tunnel state.
    async fn status(&self) -> TunnelStatus;
}

/// Connector driving `wg-quick`.
///
/// The interface name is derived from the config file stem, which is how
/// wg-quick itself names the interface it creates.
pub struct WireGuardConnector {
    binary: PathBuf,
    config_path: PathBuf,
    interface: String,
}

impl WireGuardConnector {
    /// Locate `wg-quick` on PATH and prepare a connector for `config_path`.
    pub fn new(config_path: &Path) -> Result<Self> {
        let binary = which::which("wg-quick").map_err(|e| {
            Error::ExternalTool(format!("wg-quick not found on PATH: {e}"))
        })?;

        let interface = config_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Config {
                message: format!(
                    "cannot derive interface name from {}",
                    config_path.display()
                ),
                key: Some("vpn.config_path".to_string()),
            })?;

        Ok(Self {
            binary,
            config_path: config_path.to_path_buf(),
            interface,
        })
    }

    async fn run(&self, action: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        let child = Command::new(&self.binary)
            .arg(action)
            .arg(&self.config_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ExternalTool(format!("failed to spawn wg-quick: {e}")))?;

        let output = match cancel {
            Some(cancel) => {
                let wait = child.wait_with_output();
                tokio::pin!(wait);
                tokio::select! {
                    output = &mut wait => output,
                    _ = cancel.cancelled() => {
                        // Dropping the wait future drops the child, and
                        // kill_on_drop reaps it; roll the interface back so
                        // a cancelled connect leaves nothing behind.
                        drop(wait);
                        let _ = Command::new(&self.binary)
                            .arg("down")
                            .arg(&self.config_path)
                            .output()
                            .await;
                        return Err(Error::Cancelled);
                    }
                }
            }
            None => child.wait_with_output().await,
        }
        .map_err(|e| Error::ExternalTool(format!("wg-quick {action} failed to run: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExternalTool(format!(
                "wg-quick {action} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl TunnelConnector for WireGuardConnector {
    async fn connect(&self, cancel: &CancellationToken) -> Result<String> {
        info!(config = %self.config_path.display(), "bringing WireGuard tunnel up");
        self.run("up", Some(cancel)).await?;
        Ok(self.interface.clone())
    }

    async fn disconnect(&self) -> Result<()> {
        info!(interface = %self.interface, "tearing WireGuard tunnel down");
        if let Err(e) = self.run("down", None).await {
            // Tearing down an already-down tunnel fails; that is fine
            warn!(error = %e, "wg-quick down reported an error");
        }
        Ok(())
    }

    async fn status(&self) -> TunnelStatus {
        if interface_is_up(&self.interface) {
            TunnelStatus::Connected {
                interface: self.interface.clone(),
            }
        } else {
            TunnelStatus::Disconnected
        }
    }
}
