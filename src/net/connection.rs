//! Connection ownership and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Own the socket (plain or TLS) for exactly one exchange at a time
//! - Provide the forceful abort primitive (reset instead of graceful close)
//! - Count open sockets per pool

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::http::request::Protocol;

/// Process-wide source of socket IDs. Only uniqueness matters.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one socket in logs, across reuse by several exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A byte stream a [`Connection`] can run an exchange over.
pub trait Io: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {
    /// Arrange for the peer to observe a reset rather than an orderly close
    /// when this stream is dropped.
    fn abort(&mut self) {}
}

impl Io for TcpStream {
    fn abort(&mut self) {
        #[allow(deprecated)]
        let _ = self.set_linger(Some(Duration::ZERO));
    }
}

impl Io for tokio_rustls::client::TlsStream<TcpStream> {
    fn abort(&mut self) {
        self.get_mut().0.abort();
    }
}

#[cfg(test)]
impl Io for tokio::io::DuplexStream {}

/// Counts open sockets.
///
/// Every [`Connection`] carries a guard; the count drops when it is closed.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    open_count: Arc<AtomicU64>,
    opened_total: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly opened socket. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            open_count: Arc::clone(&self.open_count),
            id: ConnectionId::new(),
        }
    }

    /// Sockets currently open (in use or idle).
    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Sockets ever opened through this tracker.
    pub fn opened_total(&self) -> u64 {
        self.opened_total.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a socket's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    open_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// An owned socket to one (protocol, host, port).
pub struct Connection {
    protocol: Protocol,
    io: Box<dyn Io>,
    guard: ConnectionGuard,
}

impl Connection {
    pub fn new(protocol: Protocol, io: impl Io, guard: ConnectionGuard) -> Self {
        Self {
            protocol,
            io: Box::new(io),
            guard,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Forcefully tear the socket down. Consuming `self` makes this a one-shot.
    pub fn abort(mut self) {
        tracing::debug!(connection_id = %self.id(), "Aborting connection");
        self.io.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.io).poll_shutdown(cx)
    }
}
