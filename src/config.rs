//! Configuration types for nzbtunnel

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf};

use crate::error::{Error, Result};

/// Download behavior configuration (directories, concurrency)
///
/// Groups settings related to how segments are fetched and where files land.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory for in-progress jobs (default: "./incomplete")
    ///
    /// Each job assembles into `<incomplete_dir>/<job-name>/`.
    #[serde(default = "default_incomplete_dir")]
    pub incomplete_dir: PathBuf,

    /// Directory finished jobs are extracted/moved into (default: "./complete")
    #[serde(default = "default_complete_dir")]
    pub complete_dir: PathBuf,

    /// Per-file segment download concurrency (default: 8)
    #[serde(default = "default_segment_parallelism")]
    pub segment_parallelism: usize,

    /// Skip the free-disk-space preflight before each job (default: false)
    #[serde(default)]
    pub skip_space_check: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            incomplete_dir: default_incomplete_dir(),
            complete_dir: default_complete_dir(),
            segment_parallelism: default_segment_parallelism(),
            skip_space_check: false,
        }
    }
}

/// NNTP server configuration
///
/// Seeds the `servers` table on first startup; afterwards the table is the
/// source of truth and is managed through the admin endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Display name (unique per installation)
    pub name: String,

    /// Server hostname
    pub host: String,

    /// Server port (default: 119, common TLS port is 563)
    #[serde(default = "default_nntp_port")]
    pub port: u16,

    /// Use TLS for this server (default: false)
    #[serde(default)]
    pub tls: bool,

    /// Username for authentication (None = no AUTHINFO exchange)
    #[serde(default)]
    pub username: Option<String>,

    /// Password for authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Desired connection count, clamped to 1..=50 at pool creation (default: 10)
    #[serde(default = "default_connections")]
    pub connections: u32,

    /// Whether this server participates in fetching (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// How the VPN coordinator manages the tunnel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnMode {
    /// No VPN: sockets dial unbound
    #[default]
    Off,
    /// Monitor a pre-existing interface by name; pause/resume on its state
    Passive,
    /// Bring the tunnel up/down ourselves via an external userland tool
    Managed,
}

/// Which external tool the managed-mode connector drives
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProvider {
    /// `wg-quick up/down <config>`
    #[default]
    WireGuard,
}

/// VPN coordinator configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VpnConfig {
    /// Coordinator mode (default: off)
    #[serde(default)]
    pub mode: VpnMode,

    /// Interface name to monitor in passive mode (e.g. "wg0", "tun0")
    #[serde(default)]
    pub interface: String,

    /// Tunnel tool used in managed mode
    #[serde(default)]
    pub provider: TunnelProvider,

    /// Tunnel configuration file for managed mode (e.g. a wg-quick .conf)
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path to the SQLite database file (default: "./nzbtunnel.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Control plane configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address for the HTTP control plane (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Allow cross-origin requests (default: true; web UIs run off-origin)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
        }
    }
}

/// Main configuration for [`NzbTunnel`](crate::NzbTunnel)
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - directories, segment concurrency
/// - [`vpn`](VpnConfig) - coordinator mode, interface, tunnel tool
/// - [`persistence`](PersistenceConfig) - database location
/// - [`api`](ApiConfig) - control plane bind address
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// NNTP server configurations (seed the servers table on first run)
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Download behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// VPN coordinator settings
    #[serde(default)]
    pub vpn: VpnConfig,

    /// Data storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Control plane settings
    #[serde(flatten)]
    pub api: ApiConfig,
}

impl Config {
    /// Validate cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.download.segment_parallelism == 0 {
            return Err(Error::Config {
                message: "segment_parallelism must be at least 1".to_string(),
                key: Some("segment_parallelism".to_string()),
            });
        }

        if self.download.incomplete_dir == self.download.complete_dir {
            return Err(Error::Config {
                message: "incomplete_dir and complete_dir must differ".to_string(),
                key: Some("complete_dir".to_string()),
            });
        }

        match self.vpn.mode {
            VpnMode::Passive if self.vpn.interface.is_empty() => Err(Error::Config {
                message: "passive VPN mode requires an interface name".to_string(),
                key: Some("vpn.interface".to_string()),
            }),
            VpnMode::Managed if self.vpn.config_path.is_none() => Err(Error::Config {
                message: "managed VPN mode requires a tunnel config path".to_string(),
                key: Some("vpn.config_path".to_string()),
            }),
            _ => Ok(()),
        }
    }

    /// Incomplete (in-progress) download root
    pub fn incomplete_dir(&self) -> &PathBuf {
        &self.download.incomplete_dir
    }

    /// Completion directory
    pub fn complete_dir(&self) -> &PathBuf {
        &self.download.complete_dir
    }
}

fn default_incomplete_dir() -> PathBuf {
    PathBuf::from("./incomplete")
}

fn default_complete_dir() -> PathBuf {
    PathBuf::from("./complete")
}

fn default_segment_parallelism() -> usize {
    8
}

fn default_nntp_port() -> u16 {
    119
}

fn default_connections() -> u32 {
    10
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./nzbtunnel.db")
}

fn default_bind_address() -> SocketAddr {
    ([127, 0, 0, 1], 8080).into()
}

fn default_true() -> bool {
    true
}
