//! Bounded per-server connection pool.
//!
//! Leases are exclusive: a connection belongs to exactly one caller until it
//! is returned or discarded, and return/discard pair 1:1 with successful
//! leases. Capacity is a hard ceiling on connections in existence (leased
//! plus idle), clamped to 1..=50.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::db::NewsServer;
use crate::error::NntpError;

use super::connection::NntpConnection;
use super::dialer::Dialer;

type Result<T> = std::result::Result<T, NntpError>;

/// Hard upper bound on per-server connections
const MAX_CAPACITY: u32 = 50;

/// Bounded reusable set of connections to one news server.
pub struct ServerPool {
    server: NewsServer,
    dialer: Dialer,
    capacity: usize,
    idle: Mutex<VecDeque<NntpConnection>>,
    /// Connections in existence (leased + idle), bounded by `capacity`
    active: Mutex<usize>,
    /// Signalled on every return/discard so blocked leases can re-check
    returned: Notify,
    closed: AtomicBool,
}

impl ServerPool {
    /// Create a pool for `server`, dialing through `dialer`.
    pub fn new(server: NewsServer, dialer: Dialer) -> Self {
        let desired = server.connections.clamp(1, MAX_CAPACITY);

        debug!(
            server = %server.name,
            capacity = desired,
            interface = %dialer.interface(),
            "creating connection pool"
        );

        Self {
            server,
            dialer,
            capacity: desired as usize,
            idle: Mutex::new(VecDeque::new()),
            active: Mutex::new(0),
            returned: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// The server this pool fronts
    pub fn server(&self) -> &NewsServer {
        &self.server
    }

    /// Capacity ceiling
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Connections currently in existence
    pub async fn active_count(&self) -> usize {
        *self.active.lock().await
    }

    /// Idle connections currently parked
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Lease a connection.
    ///
    /// Returns an idle connection when one is parked; dials a new one when
    /// under capacity; otherwise blocks until a return/discard frees a slot
    /// or `cancel` fires.
    pub async fn lease(&self, cancel: &CancellationToken) -> Result<NntpConnection> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(NntpError::PoolClosed);
            }

            if let Some(conn) = self.idle.lock().await.pop_front() {
                return Ok(conn);
            }

            let may_dial = {
                let mut active = self.active.lock().await;
                if *active < self.capacity {
                    *active += 1;
                    true
                } else {
                    false
                }
            };

            if may_dial {
                match NntpConnection::connect(&self.dialer, &self.server).await {
                    Ok(conn) => return Ok(conn),
                    Err(e) => {
                        *self.active.lock().await -= 1;
                        self.returned.notify_one();
                        return Err(e);
                    }
                }
            }

            tokio::select! {
                _ = self.returned.notified() => continue,
                _ = cancel.cancelled() => return Err(NntpError::Cancelled),
            }
        }
    }

    /// Return a healthy connection to the idle set.
    ///
    /// Must only be called for connections that completed their last request
    /// cleanly; broken connections go through [`ServerPool::discard`].
    pub async fn put_back(&self, conn: NntpConnection) {
        if self.closed.load(Ordering::SeqCst) {
            conn.close().await;
            *self.active.lock().await -= 1;
        } else {
            self.idle.lock().await.push_back(conn);
        }
        self.returned.notify_one();
    }

    /// Close and destroy a connection that hit a transport or protocol error.
    pub async fn discard(&self, conn: NntpConnection) {
        conn.close().await;
        *self.active.lock().await -= 1;
        self.returned.notify_one();
    }

    /// Close the pool: all idle connections are closed and future leases
    /// fail. Leased connections drain through put_back/discard as their
    /// holders finish; no hard interrupt is issued.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let drained: Vec<NntpConnection> = {
            let mut idle = self.idle.lock().await;
            idle.drain(..).collect()
        };
        let drained_count = drained.len();

        for conn in drained {
            conn.close().await;
        }
        *self.active.lock().await -= drained_count;

        self.returned.notify_waiters();
        debug!(server = %self.server.name, "connection pool closed");
    }

    /// Whether close() has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
