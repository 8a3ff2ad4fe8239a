//! Transport error types.
//!
//! # Taxonomy
//! - `Aborted`: the abort signal fired before dispatch or while in flight
//! - `Network`: DNS, connect, TLS, reset, premature close, malformed peer
//!   data, unsupported scheme
//! - `Stream`: the request body stream yielded an error while piping
//!
//! Every failure path of a single `handle` call produces exactly one of
//! these. Retrying is left to the caller.

use std::io;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Error category, stable across message wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Aborted,
    Network,
    Stream,
}

/// Errors produced by the transport handler.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request was cancelled through its abort signal.
    #[error("Request aborted")]
    Aborted,

    /// Connection-level failure.
    #[error("{message}")]
    Network {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The request body stream failed while being written.
    #[error("Request body stream failed: {message}")]
    Stream { message: String },
}

impl TransportError {
    /// Build a network error from a message alone.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Build a network error that wraps an I/O error, prefixing the context.
    pub fn io(context: &str, err: io::Error) -> Self {
        Self::Network {
            message: format!("{}: {}", context, err),
            source: Some(err),
        }
    }

    /// Build a stream error.
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Aborted => ErrorKind::Aborted,
            Self::Network { .. } => ErrorKind::Network,
            Self::Stream { .. } => ErrorKind::Stream,
        }
    }

    /// Conventional error name, as surfaced to callers that match on names.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aborted => "AbortError",
            Self::Network { .. } => "NetworkError",
            Self::Stream { .. } => "StreamError",
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O error", err)
    }
}
