//! Default keep-alive connection pool.
//!
//! # Responsibilities
//! - Cap in-use sockets per destination (`max_sockets`)
//! - Keep released sockets idle for reuse (`max_free_sockets`)
//! - Discard idle sockets that outlived `keep_alive_timeout_ms` or were
//!   closed by the peer
//! - Sweep expired idle sockets and unused destinations on every release
//! - Refuse work after `destroy()`

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;

use crate::agent::{Agent, PoolKey, PooledConnection};
use crate::config::{AgentConfig, ConfigError};
use crate::error::TransportError;
use crate::net::{Connection, ConnectionTracker, Connector};
use crate::observability::metrics;

/// Per-destination state.
#[derive(Debug)]
struct HostPool {
    /// `None` when `max_sockets` is unbounded.
    permits: Option<Arc<Semaphore>>,
    idle: VecDeque<IdleConnection>,
}

impl HostPool {
    fn new(max_sockets: Option<usize>) -> Self {
        Self {
            permits: max_sockets.map(|n| Arc::new(Semaphore::new(n))),
            idle: VecDeque::new(),
        }
    }

    /// Nothing idle, and no permit held or awaited. An entry whose semaphore
    /// is still shared must stay, or a fresh one would lift the cap.
    fn is_unused(&self) -> bool {
        self.idle.is_empty()
            && self
                .permits
                .as_ref()
                .map_or(true, |semaphore| Arc::strong_count(semaphore) == 1)
    }
}

#[derive(Debug)]
struct IdleConnection {
    conn: Connection,
    since: Instant,
}

/// Pool of reusable sockets keyed by (protocol, host, port).
#[derive(Debug)]
pub struct ConnectionPool {
    config: AgentConfig,
    connector: Connector,
    hosts: DashMap<PoolKey, HostPool>,
    destroyed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(config: AgentConfig) -> Result<Self, ConfigError> {
        let connector = Connector::new(&config.tls, ConnectionTracker::new())?;
        Ok(Self::with_connector(config, connector))
    }

    pub fn with_connector(config: AgentConfig, connector: Connector) -> Self {
        Self {
            config,
            connector,
            hosts: DashMap::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Open-socket accounting for this pool.
    pub fn tracker(&self) -> &ConnectionTracker {
        self.connector.tracker()
    }

    /// Idle sockets currently held for `key`.
    pub fn idle_count(&self, key: &PoolKey) -> usize {
        self.hosts.get(key).map(|h| h.idle.len()).unwrap_or(0)
    }

    /// Destinations with pool state.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn destroyed_error() -> TransportError {
        TransportError::network("agent has been destroyed")
    }

    /// Pop the most recently released live socket, dropping stale ones.
    fn checkout_idle(&self, key: &PoolKey) -> Option<Connection> {
        let max_idle = self.config.keep_alive_timeout();
        let mut host = self.hosts.get_mut(key)?;
        while let Some(IdleConnection { mut conn, since }) = host.idle.pop_back() {
            if since.elapsed() >= max_idle {
                tracing::trace!(connection_id = %conn.id(), "Discarding expired idle connection");
                continue;
            }
            if !is_alive(&mut conn) {
                tracing::trace!(connection_id = %conn.id(), "Discarding idle connection closed by peer");
                continue;
            }
            return Some(conn);
        }
        None
    }

    /// Close idle sockets past `keep_alive_timeout_ms` across all
    /// destinations and forget destinations nobody is using.
    ///
    /// Must not be called while holding a guard into `hosts`.
    fn prune(&self) {
        let max_idle = self.config.keep_alive_timeout();
        let mut expired = 0;
        self.hosts.retain(|_, host| {
            let before = host.idle.len();
            host.idle.retain(|idle| idle.since.elapsed() < max_idle);
            expired += before - host.idle.len();
            !host.is_unused()
        });
        if expired > 0 {
            tracing::trace!(expired, "Closed expired idle connections");
        }
    }
}

/// An idle HTTP/1.1 socket must have nothing to read; EOF, stray bytes or an
/// error all mean it cannot carry another exchange.
fn is_alive(conn: &mut Connection) -> bool {
    let mut peek = [0u8; 1];
    conn.read(&mut peek).now_or_never().is_none()
}

#[async_trait]
impl Agent for ConnectionPool {
    async fn acquire(&self, key: &PoolKey) -> Result<PooledConnection, TransportError> {
        if self.is_destroyed() {
            return Err(Self::destroyed_error());
        }

        // Clone the semaphore out so no map guard is held across the await.
        let permits = self
            .hosts
            .entry(key.clone())
            .or_insert_with(|| HostPool::new(self.config.max_sockets))
            .permits
            .clone();

        let permit = match permits {
            Some(semaphore) => Some(
                semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Self::destroyed_error())?,
            ),
            None => None,
        };

        if let Some(conn) = self.checkout_idle(key) {
            metrics::record_connection_reused();
            tracing::debug!(connection_id = %conn.id(), destination = %key, "Reusing idle connection");
            return Ok(PooledConnection::new(key.clone(), conn, true, permit));
        }

        let conn = self.connector.connect(key).await?;
        Ok(PooledConnection::new(key.clone(), conn, false, permit))
    }

    fn release(&self, conn: PooledConnection) {
        let key = conn.key().clone();
        let (conn, permit) = conn.into_parts();

        if self.config.keep_alive && !self.is_destroyed() {
            // The entry may have been swept while this socket was out; the
            // held permit keeps a bounded entry alive, so recreating is safe.
            let mut host = self
                .hosts
                .entry(key.clone())
                .or_insert_with(|| HostPool::new(self.config.max_sockets));
            if host.idle.len() < self.config.max_free_sockets {
                tracing::trace!(connection_id = %conn.id(), destination = %key, "Connection returned to pool");
                host.idle.push_back(IdleConnection {
                    conn,
                    since: Instant::now(),
                });
            }
        }

        // Free the slot only after the socket is visible to the next waiter.
        drop(permit);
        self.prune();
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut closed = 0;
        for host in self.hosts.iter() {
            if let Some(semaphore) = &host.permits {
                semaphore.close();
            }
            closed += host.idle.len();
        }
        self.hosts.clear();
        tracing::debug!(idle_closed = closed, "Connection pool destroyed");
    }

    fn keep_alive(&self) -> bool {
        self.config.keep_alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Protocol;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, PoolKey) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, PoolKey::new(Protocol::Http, "127.0.0.1", port))
    }

    /// Accept connections and hold them open.
    fn hold_open(listener: TcpListener) {
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
    }

    #[tokio::test]
    async fn released_connection_is_reused() {
        let (listener, key) = listener().await;
        hold_open(listener);
        let pool = ConnectionPool::new(AgentConfig::default()).unwrap();

        let first = pool.acquire(&key).await.unwrap();
        assert!(!first.is_reused());
        let first_id = first.id();
        pool.release(first);
        assert_eq!(pool.idle_count(&key), 1);

        let second = pool.acquire(&key).await.unwrap();
        assert!(second.is_reused());
        assert_eq!(second.id(), first_id);
        assert_eq!(pool.tracker().opened_total(), 1);
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn pool_is_shareable_across_tasks() {
        assert_send_sync::<ConnectionPool>();
        assert_send_sync::<Connection>();
    }

    #[tokio::test]
    async fn release_sweeps_expired_sockets_of_other_destinations() {
        let (stale_listener, stale_key) = listener().await;
        let (fresh_listener, fresh_key) = listener().await;
        hold_open(stale_listener);
        hold_open(fresh_listener);
        let config = AgentConfig {
            keep_alive_timeout_ms: 20,
            ..AgentConfig::default()
        };
        let pool = ConnectionPool::new(config).unwrap();

        let conn = pool.acquire(&stale_key).await.unwrap();
        pool.release(conn);
        assert_eq!(pool.idle_count(&stale_key), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let conn = pool.acquire(&fresh_key).await.unwrap();
        pool.release(conn);

        assert_eq!(pool.idle_count(&stale_key), 0);
        assert_eq!(pool.idle_count(&fresh_key), 1);
        assert_eq!(pool.host_count(), 1);
        assert_eq!(pool.tracker().open_count(), 1);
    }

    #[tokio::test]
    async fn unused_destinations_are_forgotten() {
        let (listener, key) = listener().await;
        hold_open(listener);
        let config = AgentConfig {
            keep_alive: false,
            max_sockets: Some(2),
            ..AgentConfig::default()
        };
        let pool = ConnectionPool::new(config).unwrap();

        let first = pool.acquire(&key).await.unwrap();
        let second = pool.acquire(&key).await.unwrap();
        pool.release(first);
        // The second socket still holds a permit.
        assert_eq!(pool.host_count(), 1);

        pool.release(second);
        assert_eq!(pool.host_count(), 0);
        assert_eq!(pool.tracker().open_count(), 0);
    }

    #[tokio::test]
    async fn keep_alive_disabled_closes_on_release() {
        let (listener, key) = listener().await;
        hold_open(listener);
        let config = AgentConfig {
            keep_alive: false,
            ..AgentConfig::default()
        };
        let pool = ConnectionPool::new(config).unwrap();

        let conn = pool.acquire(&key).await.unwrap();
        pool.release(conn);
        assert_eq!(pool.idle_count(&key), 0);
        assert_eq!(pool.tracker().open_count(), 0);
    }

    #[tokio::test]
    async fn max_sockets_blocks_until_release() {
        let (listener, key) = listener().await;
        hold_open(listener);
        let config = AgentConfig {
            max_sockets: Some(1),
            ..AgentConfig::default()
        };
        let pool = Arc::new(ConnectionPool::new(config).unwrap());

        let held = pool.acquire(&key).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            let key = key.clone();
            tokio::spawn(async move { pool.acquire(&key).await.map(|c| c.is_reused()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.release(held);
        let reused = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(reused);
    }

    #[tokio::test]
    async fn peer_closed_idle_connection_is_discarded() {
        let (listener, key) = listener().await;
        let pool = ConnectionPool::new(AgentConfig::default()).unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let conn = pool.acquire(&key).await.unwrap();
        let server_side = accept.await.unwrap();
        pool.release(conn);

        drop(server_side);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(pool.checkout_idle(&key).is_none());
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_refuses_work() {
        let (listener, key) = listener().await;
        hold_open(listener);
        let pool = ConnectionPool::new(AgentConfig::default()).unwrap();

        let conn = pool.acquire(&key).await.unwrap();
        pool.release(conn);

        pool.destroy();
        pool.destroy();

        assert_eq!(pool.tracker().open_count(), 0);
        let err = pool.acquire(&key).await.unwrap_err();
        assert!(err.to_string().contains("destroyed"));
    }
}
