//! Pool manager: every per-server pool, plus the dialer policy.
//!
//! Fetches iterate pools in ascending server-id order and retry across
//! rounds with exponential backoff. When the VPN interface changes the
//! whole map is torn down - existing connections hold the old binding and
//! must never be reused.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::NewsServer;
use crate::error::NntpError;

use super::dialer::Dialer;
use super::pool::ServerPool;

type Result<T> = std::result::Result<T, NntpError>;

/// Retry rounds across the pool set for one article
const FETCH_ROUNDS: u32 = 3;

struct Inner {
    /// Interface name new connections bind to (empty = unbound)
    interface: String,
    /// Pools keyed by server identity; BTreeMap gives the deterministic
    /// ascending-id iteration order fetches rely on
    pools: BTreeMap<i64, Arc<ServerPool>>,
}

/// Owns all per-server pools and the current interface policy.
pub struct PoolManager {
    inner: RwLock<Inner>,
}

impl PoolManager {
    /// Create an empty manager whose new connections bind to `interface`.
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                interface: interface.into(),
                pools: BTreeMap::new(),
            }),
        }
    }

    /// The interface new connections currently bind to
    pub async fn interface(&self) -> String {
        self.inner.read().await.interface.clone()
    }

    /// A dialer carrying the current interface policy (server tests).
    pub async fn dialer(&self) -> Dialer {
        Dialer::new(self.inner.read().await.interface.clone())
    }

    /// Reconcile the pool map with the enabled subset of `servers`.
    ///
    /// Pools whose server disappeared (or was disabled) are closed and
    /// removed; new enabled servers get fresh pools; entries whose record is
    /// unchanged keep their pool, idle connections included.
    pub async fn update_servers(&self, servers: Vec<NewsServer>) {
        let mut inner = self.inner.write().await;

        let enabled: BTreeMap<i64, NewsServer> = servers
            .into_iter()
            .filter(|s| s.enabled)
            .map(|s| (s.id, s))
            .collect();

        let existing_ids: Vec<i64> = inner.pools.keys().copied().collect();
        for id in existing_ids {
            let keep = enabled
                .get(&id)
                .map(|server| {
                    inner
                        .pools
                        .get(&id)
                        .map(|pool| pool.server() == server && !pool.is_closed())
                        .unwrap_or(false)
                })
                .unwrap_or(false);

            if !keep && let Some(pool) = inner.pools.remove(&id) {
                debug!(server_id = id, "closing pool for removed or changed server");
                pool.close().await;
            }
        }

        let dialer = Dialer::new(inner.interface.clone());
        for (id, server) in enabled {
            inner
                .pools
                .entry(id)
                .or_insert_with(|| Arc::new(ServerPool::new(server, dialer.clone())));
        }

        info!(pools = inner.pools.len(), "server pools reconciled");
    }

    /// Atomically switch the dialer policy to `interface`.
    ///
    /// Closes every pool and resets the map to empty: existing connections
    /// hold the old binding and must not be reused. The caller follows up
    /// with [`PoolManager::update_servers`] to repopulate.
    pub async fn set_interface(&self, interface: &str) {
        let mut inner = self.inner.write().await;

        info!(from = %inner.interface, to = %interface, "switching bound interface");
        let old_pools = std::mem::take(&mut inner.pools);
        futures::future::join_all(old_pools.values().map(|pool| pool.close())).await;
        inner.interface = interface.to_string();
    }

    /// Close every pool (VPN down). The map is kept; leases now fail until
    /// the next [`PoolManager::set_interface`] + update cycle.
    pub async fn close_all(&self) {
        let inner = self.inner.write().await;
        futures::future::join_all(inner.pools.values().map(|pool| pool.close())).await;
        info!("all server pools closed");
    }

    /// Fetch one article body, trying every pool with cross-server retry.
    ///
    /// Up to [`FETCH_ROUNDS`] rounds over the pool set, with exponential
    /// backoff (1 s, then 2 s) before the retry rounds. Healthy connections
    /// are returned to their pool; any transport or protocol failure
    /// discards the connection and moves on to the next pool.
    pub async fn fetch_article(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
    ) -> Result<Vec<u8>> {
        let mut attempts = 0u32;
        let mut last_error: Option<NntpError> = None;

        for round in 0..FETCH_ROUNDS {
            if round > 0 {
                let backoff = Duration::from_secs(1 << (round - 1));
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(NntpError::Cancelled),
                }
            }

            // Snapshot under the read lock; leasing and fetching happen
            // outside it so close_all/set_interface are never blocked by a
            // slow article.
            let pools: Vec<Arc<ServerPool>> =
                self.inner.read().await.pools.values().cloned().collect();

            if pools.is_empty() {
                last_error = Some(NntpError::NoServers);
                continue;
            }

            for pool in pools {
                if cancel.is_cancelled() {
                    return Err(NntpError::Cancelled);
                }

                attempts += 1;
                let mut conn = match pool.lease(cancel).await {
                    Ok(conn) => conn,
                    Err(NntpError::Cancelled) => return Err(NntpError::Cancelled),
                    Err(e) => {
                        debug!(server = %pool.server().name, error = %e, "lease failed");
                        last_error = Some(e);
                        continue;
                    }
                };

                match conn.fetch_body(message_id).await {
                    Ok(body) => {
                        pool.put_back(conn).await;
                        return Ok(body);
                    }
                    Err(e) => {
                        debug!(
                            server = %pool.server().name,
                            message_id,
                            error = %e,
                            "fetch failed, discarding connection"
                        );
                        pool.discard(conn).await;
                        last_error = Some(e);
                    }
                }
            }
        }

        let last = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no fetch attempted".to_string());
        warn!(message_id, attempts, last, "article fetch exhausted");

        Err(NntpError::FetchExhausted {
            message_id: message_id
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string(),
            attempts,
            last,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::super::test_server::{MockNntpServer, ServerBehavior};
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn fetch_succeeds_from_a_single_pool() {
        let mock =
            MockNntpServer::start(ServerBehavior::new().with_article("m@x", b"hello\n")).await;
        let manager = PoolManager::new("");
        manager.update_servers(vec![mock.news_server()]).await;

        let body = manager
            .fetch_article(&CancellationToken::new(), "m@x")
            .await
            .unwrap();
        assert_eq!(body, b"hello\n");
    }

    #[tokio::test]
    async fn retry_across_servers_discards_the_failing_connection() {
        // Server A does not carry the article; server B does
        let server_a = MockNntpServer::start(ServerBehavior::new()).await;
        let server_b =
            MockNntpServer::start(ServerBehavior::new().with_article("m@x", b"from b\n")).await;

        let manager = PoolManager::new("");
        manager
            .update_servers(vec![
                server_a.news_server_named(1, "a"),
                server_b.news_server_named(2, "b"),
            ])
            .await;

        let body = manager
            .fetch_article(&CancellationToken::new(), "m@x")
            .await
            .unwrap();
        assert_eq!(body, b"from b\n");

        // A's 430 connection was discarded, not returned: the pool holds no
        // idle connections afterwards.
        let inner = manager.inner.read().await;
        let pool_a = inner.pools.get(&1).unwrap();
        assert_eq!(pool_a.idle_count().await, 0);
        assert_eq!(pool_a.active_count().await, 0, "430 connection was destroyed");
        let pool_b = inner.pools.get(&2).unwrap();
        assert_eq!(pool_b.idle_count().await, 1, "B's connection was returned");
    }

    #[tokio::test]
    async fn exhausted_fetch_reports_attempts_and_last_error() {
        let mock = MockNntpServer::start(ServerBehavior::new()).await;
        let manager = PoolManager::new("");
        manager.update_servers(vec![mock.news_server()]).await;

        // Rides out the two real backoff sleeps (1 s + 2 s)
        let err = manager
            .fetch_article(&CancellationToken::new(), "gone@x")
            .await
            .unwrap_err();

        match err {
            NntpError::FetchExhausted {
                message_id,
                attempts,
                last,
            } => {
                assert_eq!(message_id, "gone@x");
                assert_eq!(attempts, 3, "one attempt per round on a single pool");
                assert!(last.contains("430") || last.contains("unavailable"), "last: {last}");
            }
            other => panic!("expected FetchExhausted, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_servers_yields_fetch_exhausted() {
        // No pools, so no real I/O: paused time fast-forwards the backoffs
        let manager = PoolManager::new("");

        let err = manager
            .fetch_article(&CancellationToken::new(), "m@x")
            .await
            .unwrap_err();

        match err {
            NntpError::FetchExhausted { last, .. } => {
                assert!(last.contains("no enabled news servers"), "last: {last}");
            }
            other => panic!("expected FetchExhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn update_servers_is_idempotent() {
        let mock = MockNntpServer::start(ServerBehavior::new().with_article("m@x", b"x\n")).await;
        let manager = PoolManager::new("");

        let servers = vec![mock.news_server()];
        manager.update_servers(servers.clone()).await;

        // Park an idle connection, then reconcile with the identical list
        manager
            .fetch_article(&CancellationToken::new(), "m@x")
            .await
            .unwrap();
        manager.update_servers(servers).await;

        let inner = manager.inner.read().await;
        let pool = inner.pools.get(&1).unwrap();
        assert_eq!(
            pool.idle_count().await,
            1,
            "unchanged server keeps its pool and idle connections"
        );
    }

    #[tokio::test]
    async fn disabling_a_server_closes_and_removes_its_pool() {
        let mock = MockNntpServer::start(ServerBehavior::new().with_article("m@x", b"x\n")).await;
        let manager = PoolManager::new("");
        manager.update_servers(vec![mock.news_server()]).await;
        manager
            .fetch_article(&CancellationToken::new(), "m@x")
            .await
            .unwrap();

        let mut disabled = mock.news_server();
        disabled.enabled = false;
        manager.update_servers(vec![disabled]).await;

        assert!(manager.inner.read().await.pools.is_empty());
    }

    #[tokio::test]
    async fn changed_server_record_recreates_the_pool() {
        let mock = MockNntpServer::start(ServerBehavior::new().with_article("m@x", b"x\n")).await;
        let manager = PoolManager::new("");
        manager.update_servers(vec![mock.news_server()]).await;
        manager
            .fetch_article(&CancellationToken::new(), "m@x")
            .await
            .unwrap();

        let mut changed = mock.news_server();
        changed.connections = 2;
        manager.update_servers(vec![changed]).await;

        let inner = manager.inner.read().await;
        let pool = inner.pools.get(&1).unwrap();
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.idle_count().await, 0, "old pool's connections are gone");
    }

    #[tokio::test]
    async fn set_interface_resets_the_map() {
        let mock = MockNntpServer::start(ServerBehavior::new().with_article("m@x", b"x\n")).await;
        let manager = PoolManager::new("");
        manager.update_servers(vec![mock.news_server()]).await;
        manager
            .fetch_article(&CancellationToken::new(), "m@x")
            .await
            .unwrap();

        manager.set_interface("tun9").await;
        assert_eq!(manager.interface().await, "tun9");
        assert!(
            manager.inner.read().await.pools.is_empty(),
            "old-binding pools must not survive an interface change"
        );
    }

    #[tokio::test]
    async fn close_all_keeps_the_map_but_fails_leases() {
        let mock = MockNntpServer::start(ServerBehavior::new().with_article("m@x", b"x\n")).await;
        let manager = PoolManager::new("");
        manager.update_servers(vec![mock.news_server()]).await;
        manager.close_all().await;

        assert_eq!(manager.inner.read().await.pools.len(), 1);

        // Closed pools fail every lease, so the retry rounds run dry
        let err = manager
            .fetch_article(&CancellationToken::new(), "m@x")
            .await
            .unwrap_err();
        assert!(matches!(err, NntpError::FetchExhausted { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn concurrent_fetches_of_distinct_articles_all_succeed() {
        let mut behavior = ServerBehavior::new();
        for i in 0..8 {
            behavior = behavior.with_article(&format!("m{i}@x"), format!("body {i}\n").as_bytes());
        }
        let mock = MockNntpServer::start(behavior).await;

        let manager = Arc::new(PoolManager::new(""));
        manager.update_servers(vec![mock.news_server()]).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager
                    .fetch_article(&CancellationToken::new(), &format!("m{i}@x"))
                    .await
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let body = handle.await.unwrap().unwrap();
            assert_eq!(body, format!("body {i}\n").as_bytes());
        }

        assert_eq!(mock.bodies_served.load(Ordering::SeqCst), 8);
    }
}
