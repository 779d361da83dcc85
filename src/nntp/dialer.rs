//! Interface-bound TCP/TLS dialing
//!
//! When a VPN interface name is set, every socket is bound to that interface
//! at the OS level (`SO_BINDTODEVICE`) before connecting, so traffic egresses
//! via the tunnel regardless of the routing table. With an empty interface
//! name a normal dial is performed.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::error::NntpError;

type Result<T> = std::result::Result<T, NntpError>;

/// TCP connection timeout in seconds
const TCP_CONNECT_TIMEOUT_SECS: u64 = 120;

/// TLS handshake timeout in seconds
const TLS_HANDSHAKE_TIMEOUT_SECS: u64 = 60;

/// Read half of a dialed stream (plain or TLS)
pub type StreamReader = Box<dyn AsyncRead + Unpin + Send>;
/// Write half of a dialed stream (plain or TLS)
pub type StreamWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Dials TCP (optionally TLS-wrapped) sockets pinned to a network interface.
///
/// The interface name is fixed at construction; the pool manager swaps the
/// whole dialer (and every pool with it) on VPN interface changes rather
/// than rebinding live sockets.
#[derive(Clone, Debug, Default)]
pub struct Dialer {
    interface: String,
}

impl Dialer {
    /// Create a dialer bound to `interface`; an empty name dials unbound.
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    /// The interface this dialer binds to (empty = unbound)
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Open a connection to `host:port`, TLS-wrapped when `tls` is set.
    pub async fn dial(&self, host: &str, port: u16, tls: bool) -> Result<(StreamReader, StreamWriter)> {
        debug!(host, port, tls, interface = %self.interface, "dialing NNTP server");

        let tcp_stream = self.dial_tcp(host, port).await?;

        if tls {
            let tls_stream = tls_handshake(host, tcp_stream).await?;
            let (read_half, write_half) = tokio::io::split(tls_stream);
            Ok((Box::new(read_half), Box::new(write_half)))
        } else {
            let (read_half, write_half) = tokio::io::split(tcp_stream);
            Ok((Box::new(read_half), Box::new(write_half)))
        }
    }

    /// Dial the raw TCP socket, binding to the configured interface first.
    async fn dial_tcp(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{}:{}", host, port);
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| {
                NntpError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("failed to resolve {addr}: {e}"),
                ))
            })?
            .next()
            .ok_or_else(|| {
                NntpError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("no address resolved for {addr}"),
                ))
            })?;

        let domain = if socket_addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(NntpError::Io)?;
        socket.set_nodelay(true).map_err(NntpError::Io)?;

        if !self.interface.is_empty() {
            bind_to_device(&socket, &self.interface)?;
        }

        // socket2 connect is blocking; run it off the async threads and only
        // flip to non-blocking after the connect succeeds.
        let connect_addr = socket_addr;
        let std_stream = timeout(
            Duration::from_secs(TCP_CONNECT_TIMEOUT_SECS),
            tokio::task::spawn_blocking(move || -> std::io::Result<std::net::TcpStream> {
                socket.connect(&connect_addr.into())?;
                socket.set_nonblocking(true)?;
                Ok(socket.into())
            }),
        )
        .await
        .map_err(|_| NntpError::Timeout)?
        .map_err(|e| NntpError::Io(std::io::Error::other(format!("task join error: {e}"))))?
        .map_err(NntpError::Io)?;

        TcpStream::from_std(std_stream).map_err(NntpError::Io)
    }
}

/// Bind the socket to a named interface (`SO_BINDTODEVICE`).
#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_to_device(socket: &Socket, interface: &str) -> Result<()> {
    socket
        .bind_device(Some(interface.as_bytes()))
        .map_err(|e| {
            NntpError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to bind socket to interface {interface}: {e}"),
            ))
        })
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_to_device(_socket: &Socket, interface: &str) -> Result<()> {
    Err(NntpError::BindNotSupported(format!(
        "SO_BINDTODEVICE ({interface}) requires Linux"
    )))
}

/// Run the TLS handshake over an already-bound TCP socket.
///
/// SNI and certificate validation use the server's hostname, validated
/// against the Mozilla root store.
async fn tls_handshake(
    host: &str,
    tcp_stream: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    use tokio_rustls::rustls::crypto::{CryptoProvider, ring};
    let _ = CryptoProvider::install_default(ring::default_provider());

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(host)
        .map_err(|e| NntpError::Tls(format!("invalid server name {host}: {e}")))?
        .to_owned();

    timeout(
        Duration::from_secs(TLS_HANDSHAKE_TIMEOUT_SECS),
        connector.connect(server_name, tcp_stream),
    )
    .await
    .map_err(|_| NntpError::Timeout)?
    .map_err(|e| NntpError::Tls(format!("TLS handshake failed: {e}")))
}
