//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for an [`HttpHandler`](crate::HttpHandler).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HandlerConfig {
    /// Connection pool and TLS settings.
    pub agent: AgentConfig,

    /// How long to wait for `100 Continue` before sending the body anyway.
    /// `None` waits until the peer answers.
    pub continue_timeout_ms: Option<u64>,

    /// Logging settings used by `observability::logging::init_logging`.
    pub observability: ObservabilityConfig,
}

impl HandlerConfig {
    pub fn continue_timeout(&self) -> Option<Duration> {
        self.continue_timeout_ms.map(Duration::from_millis)
    }
}

/// Connection agent (pool) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Keep sockets open for reuse after a response completes.
    pub keep_alive: bool,

    /// Maximum in-use sockets per (protocol, host, port). `None` = unbounded.
    pub max_sockets: Option<usize>,

    /// Maximum idle sockets kept per (protocol, host, port).
    pub max_free_sockets: usize,

    /// Idle sockets older than this are discarded instead of reused.
    pub keep_alive_timeout_ms: u64,

    /// TLS parameters for `https:` requests.
    pub tls: TlsOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            max_sockets: None,
            max_free_sockets: 256,
            keep_alive_timeout_ms: 5_000,
            tls: TlsOptions::default(),
        }
    }
}

impl AgentConfig {
    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_timeout_ms)
    }
}

/// TLS client options.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsOptions {
    /// Verify the peer certificate chain and hostname.
    pub reject_unauthorized: bool,

    /// Additional trusted roots (PEM). Replaces the bundled web roots.
    pub ca_path: Option<PathBuf>,

    /// Client certificate chain (PEM) for mutual TLS.
    pub cert_path: Option<PathBuf>,

    /// Client private key (PEM) for mutual TLS.
    pub key_path: Option<PathBuf>,

    /// SNI / verification name overriding the request hostname.
    pub servername: Option<String>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            reject_unauthorized: true,
            ca_path: None,
            cert_path: None,
            key_path: None,
            servername: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
