//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! PoolKey (protocol, host, port)
//!     → connector.rs (DNS + TCP connect)
//!     → tls.rs (optional TLS handshake, rustls client config)
//!     → connection.rs (owned socket, lifecycle tracking, forceful abort)
//!     → Hand off to the HTTP exchange
//! ```
//!
//! # Design Decisions
//! - Sockets are type-erased behind `Io` so pools and tests can supply their own
//! - Abort consumes the connection, so a socket is torn down at most once
//! - TLS is selected per request from the declared protocol

pub mod connection;
pub mod connector;
pub mod tls;

pub use connection::{Connection, ConnectionGuard, ConnectionId, ConnectionTracker, Io};
pub use connector::Connector;
