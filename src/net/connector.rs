//! Dialing new sockets.
//!
//! # Responsibilities
//! - Resolve and connect TCP to `host:port`
//! - Wrap the stream in TLS for `https:` keys
//! - Register each socket with the pool's tracker

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;

use crate::agent::PoolKey;
use crate::config::{ConfigError, TlsOptions};
use crate::error::TransportError;
use crate::http::request::Protocol;
use crate::net::connection::{Connection, ConnectionTracker};
use crate::net::tls;
use crate::observability::metrics;

/// Opens plaintext and TLS connections for a pool.
#[derive(Clone)]
pub struct Connector {
    tls: TlsConnector,
    servername: Option<String>,
    tracker: ConnectionTracker,
}

impl Connector {
    pub fn new(options: &TlsOptions, tracker: ConnectionTracker) -> Result<Self, ConfigError> {
        let config: Arc<ClientConfig> = tls::build_client_config(options)?;
        Ok(Self {
            tls: TlsConnector::from(config),
            servername: options.servername.clone(),
            tracker,
        })
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Open a fresh connection for `key`.
    pub async fn connect(&self, key: &PoolKey) -> Result<Connection, TransportError> {
        let host = key.host.trim_start_matches('[').trim_end_matches(']');
        let tcp = TcpStream::connect((host, key.port))
            .await
            .map_err(|e| TransportError::io(&format!("connect {}", key), e))?;
        let _ = tcp.set_nodelay(true);

        let conn = match key.protocol {
            Protocol::Http => Connection::new(Protocol::Http, tcp, self.tracker.track()),
            Protocol::Https => {
                let name = tls::server_name(&key.host, self.servername.as_deref()).ok_or_else(
                    || TransportError::network(format!("invalid TLS server name: {}", key.host)),
                )?;
                let stream = self
                    .tls
                    .connect(name, tcp)
                    .await
                    .map_err(|e| TransportError::io(&format!("TLS handshake with {}", key), e))?;
                Connection::new(Protocol::Https, stream, self.tracker.track())
            }
        };

        metrics::record_connection_opened(key.protocol);
        tracing::debug!(connection_id = %conn.id(), destination = %key, "Connection established");
        Ok(conn)
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("servername", &self.servername)
            .finish_non_exhaustive()
    }
}
