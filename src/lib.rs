//! HTTP transport handler: executes abstract HTTP requests over pooled
//! plaintext or TLS connections.

pub mod agent;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use agent::{Agent, ConnectionPool, PoolKey, PooledConnection};
pub use config::{AgentConfig, HandlerConfig, TlsOptions};
pub use error::{ErrorKind, TransportError};
pub use crate::http::{
    HandlerOptions, HttpHandler, HttpRequest, HttpResponse, Protocol, RequestBody, ResponseBody,
};
pub use lifecycle::{AbortController, AbortSignal};
