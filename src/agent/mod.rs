//! Connection agent subsystem.
//!
//! # Data Flow
//! ```text
//! handle(request)
//!     → PoolKey (protocol, host, port)
//!     → Agent::acquire
//!         - pool.rs: per-host permit (max_sockets backpressure)
//!         - pool.rs: reuse a live idle socket, else dial via net::Connector
//!     → PooledConnection (exclusively owned by one exchange)
//!     → Agent::release on clean completion, drop/abort otherwise
//! ```
//!
//! # Design Decisions
//! - The handler depends only on the `Agent` trait; the pool is pluggable
//! - Allocation decisions are serialized inside the agent, never across requests
//! - Permits are RAII: a panicking or aborted exchange still frees its slot

pub mod pool;

use std::fmt;
use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use tokio::sync::OwnedSemaphorePermit;

use crate::error::TransportError;
use crate::http::request::Protocol;
use crate::net::Connection;

pub use pool::ConnectionPool;

/// Destination a pooled socket is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl PoolKey {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
        }
    }

    /// Value for the `host` request header.
    pub fn authority(&self) -> String {
        if self.port == self.protocol.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}//{}:{}", self.protocol, self.host, self.port)
    }
}

/// Source of connections for the handler.
#[async_trait]
pub trait Agent: Send + Sync + fmt::Debug {
    /// Acquire a connection for `key`, waiting for a slot if the agent caps
    /// concurrent sockets.
    async fn acquire(&self, key: &PoolKey) -> Result<PooledConnection, TransportError>;

    /// Hand back a connection whose exchange completed cleanly.
    fn release(&self, conn: PooledConnection);

    /// Close idle sockets and refuse further acquisitions. Idempotent.
    fn destroy(&self);

    /// Whether released connections may be reused.
    fn keep_alive(&self) -> bool {
        true
    }
}

/// A connection checked out of an agent.
#[derive(Debug)]
pub struct PooledConnection {
    key: PoolKey,
    conn: Connection,
    reused: bool,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    pub fn new(
        key: PoolKey,
        conn: Connection,
        reused: bool,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            key,
            conn,
            reused,
            _permit: permit,
        }
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Whether this socket already served an earlier exchange.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Forcefully tear down the socket and free the slot.
    pub fn abort(self) {
        self.conn.abort();
    }

    /// Split into the socket and its slot permit.
    pub fn into_parts(self) -> (Connection, Option<OwnedSemaphorePermit>) {
        (self.conn, self._permit)
    }
}

impl Deref for PooledConnection {
    type Target = Connection;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}
