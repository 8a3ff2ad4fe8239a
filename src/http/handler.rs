//! HTTP transport handler.
//!
//! # Responsibilities
//! - Execute one abstract request per `handle` call over a pooled socket
//! - Race the exchange against the caller's abort signal
//! - Resolve as soon as the final status line and headers arrive
//! - Release instance-level resources on `destroy`

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use crate::agent::{Agent, ConnectionPool, PoolKey};
use crate::config::{validate_config, ConfigError, HandlerConfig};
use crate::error::TransportError;
use crate::http::codec::{BodyFraming, ResponseHead};
use crate::http::exchange::{Exchange, PreparedRequest};
use crate::http::request::{HandlerOptions, HttpRequest, Protocol, RequestId};
use crate::http::response::{BodyReader, HttpResponse, ResponseBody};
use crate::observability::metrics;

/// Executes [`HttpRequest`]s over HTTP/1.1, plaintext or TLS.
#[derive(Debug, Clone)]
pub struct HttpHandler {
    agent: Arc<dyn Agent>,
    config: Arc<HandlerConfig>,
}

enum Outcome {
    Aborted,
    Finished(Result<ResponseHead, TransportError>),
}

impl HttpHandler {
    /// Build a handler backed by the default [`ConnectionPool`].
    pub fn new(config: HandlerConfig) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let pool = ConnectionPool::new(config.agent.clone())?;
        Ok(Self::with_agent(Arc::new(pool), config))
    }

    /// Build a handler on a caller-supplied agent. `config.agent` is ignored.
    pub fn with_agent(agent: Arc<dyn Agent>, config: HandlerConfig) -> Self {
        Self {
            agent,
            config: Arc::new(config),
        }
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    /// Send `request` and wait for the response head.
    ///
    /// The body of the returned response streams from the socket. Errors
    /// while reading it are reported on the body, not here.
    pub async fn handle(
        &self,
        request: HttpRequest,
        options: HandlerOptions,
    ) -> Result<HttpResponse, TransportError> {
        let request_id = RequestId::new();
        let span = tracing::debug_span!(
            "http_request",
            request_id = %request_id,
            method = %request.method,
            host = %request.hostname,
            path = %request.path,
        );

        let start = Instant::now();
        let result = self.dispatch(request_id, request, options).instrument(span).await;

        metrics::record_request(result.as_ref().map(|r| r.status_code), start);
        result
    }

    async fn dispatch(
        &self,
        request_id: RequestId,
        request: HttpRequest,
        options: HandlerOptions,
    ) -> Result<HttpResponse, TransportError> {
        let signal = options.abort_signal;
        if signal.as_ref().is_some_and(|s| s.aborted()) {
            tracing::debug!("Request aborted before dispatch");
            metrics::record_abort();
            return Err(TransportError::Aborted);
        }

        let protocol = Protocol::parse(&request.protocol)?;
        let port = request.port.unwrap_or_else(|| protocol.default_port());
        let key = PoolKey::new(protocol, request.hostname.clone(), port);

        let prepared = PreparedRequest::new(request, &key, self.agent.keep_alive())?;
        let method = prepared.method.clone();
        let mut exchange = Exchange::new(
            request_id,
            self.agent.clone(),
            key,
            self.config.continue_timeout(),
        );

        let outcome = match &signal {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => Outcome::Aborted,
                    result = exchange.run(prepared) => Outcome::Finished(result),
                }
            }
            None => Outcome::Finished(exchange.run(prepared).await),
        };

        let head = match outcome {
            Outcome::Aborted => {
                if exchange.abort() {
                    tracing::debug!(state = ?exchange.state(), "Request aborted in flight");
                    metrics::record_abort();
                }
                return Err(TransportError::Aborted);
            }
            Outcome::Finished(Err(e)) => {
                tracing::debug!(error = %e, kind = ?e.kind(), "Request failed");
                exchange.fail(&e);
                return Err(e);
            }
            Outcome::Finished(Ok(head)) => head,
        };

        let framing = match BodyFraming::for_response(&method, &head) {
            Ok(framing) => framing,
            Err(e) => {
                exchange.fail(&e);
                return Err(e);
            }
        };

        let body = match exchange.complete(&head) {
            Some(wire) => {
                let reader = BodyReader::new(wire, framing, self.agent.clone());
                if framing == BodyFraming::Empty {
                    reader.finish();
                    ResponseBody::empty()
                } else {
                    ResponseBody::from_reader(reader, signal)
                }
            }
            None => ResponseBody::empty(),
        };

        tracing::debug!(status = head.status, framing = ?framing, "Response head received");
        Ok(HttpResponse {
            status_code: head.status,
            headers: head.headers,
            body,
        })
    }

    /// Release pooled sockets. Idempotent.
    pub fn destroy(&self) {
        self.agent.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::lifecycle::AbortController;
    use http::Method;

    #[test]
    fn new_rejects_invalid_config() {
        let config = HandlerConfig {
            agent: AgentConfig {
                max_sockets: Some(0),
                ..AgentConfig::default()
            },
            ..HandlerConfig::default()
        };
        assert!(matches!(
            HttpHandler::new(config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_protocol_is_a_network_error() {
        let handler = HttpHandler::new(HandlerConfig::default()).unwrap();
        let request = HttpRequest::new(Method::GET, "foo:", "localhost", "/");
        let err = handler
            .handle(request, HandlerOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.name(), "NetworkError");
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn pre_aborted_signal_short_circuits() {
        let handler = HttpHandler::new(HandlerConfig::default()).unwrap();
        let controller = AbortController::new();
        controller.abort();

        // Protocol is checked after the signal, so this never fails as "foo:".
        let request = HttpRequest::new(Method::GET, "foo:", "localhost", "/");
        let err = handler
            .handle(request, HandlerOptions::with_abort_signal(controller.signal()))
            .await
            .unwrap_err();
        assert!(err.is_abort());
    }

    #[test]
    fn destroy_twice() {
        let handler = HttpHandler::new(HandlerConfig::default()).unwrap();
        handler.destroy();
        handler.destroy();
    }
}
