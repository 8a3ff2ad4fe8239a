//! Per-request exchange state machine.
//!
//! # States
//! - Idle: request accepted, nothing on the network yet
//! - Connecting: waiting on the agent for a socket (new or pooled)
//! - AwaitingContinue: head sent with `Expect: 100-continue`, body held back
//! - Sending: writing the request body
//! - AwaitingResponse: waiting for the final status line and headers
//! - Completed / Failed: terminal
//!
//! # State Transitions
//! ```text
//! Idle → Connecting → Sending → AwaitingResponse → Completed
//!                   ↘ AwaitingContinue ─(100)──────↗ Sending
//!                                      ─(final)────→ AwaitingResponse (body suppressed)
//! any non-terminal ─(error)─→ Failed(Network | Stream)
//! any non-terminal ─(abort)─→ Failed(Aborted)
//! ```
//!
//! # Design Decisions
//! - One exchange owns its socket exclusively from acquisition to hand-off
//! - Reads are buffered and cancel-safe, so a timed-out wait loses no bytes
//! - Only one terminal transition is ever committed (`SettleOnce`)

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::header::{self, HeaderValue};
use http::{HeaderMap, Method};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::agent::{Agent, PoolKey, PooledConnection};
use crate::error::{ErrorKind, TransportError};
use crate::http::codec::{self, ResponseHead, LAST_CHUNK};
use crate::http::request::{BodyStream, HttpRequest, RequestBody, RequestId};
use crate::lifecycle::SettleOnce;

const READ_CHUNK: usize = 8 * 1024;

/// Lifecycle state of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Connecting,
    AwaitingContinue,
    Sending,
    AwaitingResponse,
    Completed,
    Failed(ErrorKind),
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExchangeState::Completed | ExchangeState::Failed(_))
    }
}

/// A socket plus its read buffer.
#[derive(Debug)]
pub(crate) struct Wire {
    conn: PooledConnection,
    buf: BytesMut,
    /// Whether the socket may carry another exchange once the body is drained.
    reusable: bool,
}

impl Wire {
    fn new(conn: PooledConnection) -> Self {
        Self {
            conn,
            buf: BytesMut::with_capacity(READ_CHUNK),
            reusable: true,
        }
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub(crate) fn is_reusable(&self) -> bool {
        self.reusable && self.buf.is_empty()
    }

    pub(crate) fn mark_not_reusable(&mut self) {
        self.reusable = false;
    }

    /// Read more bytes into the buffer. Returns 0 on EOF. Cancel-safe.
    pub(crate) async fn fill(&mut self) -> Result<usize, TransportError> {
        self.buf.reserve(READ_CHUNK);
        self.conn
            .read_buf(&mut self.buf)
            .await
            .map_err(|e| TransportError::io("read response", e))
    }

    /// Read the next response head (interim or final). Cancel-safe.
    async fn read_head(&mut self) -> Result<ResponseHead, TransportError> {
        loop {
            if let Some(head) = codec::parse_response_head(&mut self.buf)? {
                return Ok(head);
            }
            if self.fill().await? == 0 {
                return Err(TransportError::network("socket hang up"));
            }
        }
    }

    /// Read heads until a final (non-1xx) one arrives.
    async fn read_final_head(&mut self) -> Result<ResponseHead, TransportError> {
        loop {
            let head = self.read_head().await?;
            if !head.is_interim() {
                return Ok(head);
            }
            tracing::trace!(status = head.status, "Skipping interim response");
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.conn
            .write_all(data)
            .await
            .map_err(|e| TransportError::io("write request", e))
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.conn
            .flush()
            .await
            .map_err(|e| TransportError::io("write request", e))
    }

    pub(crate) fn abort(self) {
        self.conn.abort();
    }

    pub(crate) fn into_connection(self) -> PooledConnection {
        self.conn
    }
}

/// Request body as it will be written to the wire.
enum Outgoing {
    None,
    Fixed(Bytes),
    Stream {
        stream: BodyStream,
        chunked: bool,
        declared: Option<u64>,
    },
}

impl Outgoing {
    fn is_none(&self) -> bool {
        matches!(self, Outgoing::None)
    }
}

/// Everything needed to put one request on the wire.
pub(crate) struct PreparedRequest {
    pub(crate) method: Method,
    target: String,
    headers: HeaderMap,
    body: Outgoing,
    expect_continue: bool,
}

impl PreparedRequest {
    /// Finalize headers: host, framing, and connection persistence.
    pub(crate) fn new(
        request: HttpRequest,
        key: &PoolKey,
        keep_alive: bool,
    ) -> Result<Self, TransportError> {
        let target = request.target();
        let HttpRequest {
            method,
            mut headers,
            body,
            ..
        } = request;

        if !headers.contains_key(header::HOST) {
            let value = HeaderValue::from_str(&key.authority()).map_err(|_| {
                TransportError::network(format!("invalid host header: {:?}", key.authority()))
            })?;
            headers.insert(header::HOST, value);
        }

        let body = match body {
            RequestBody::Empty => {
                // No chunks will follow, so chunked framing would never terminate.
                headers.remove(header::TRANSFER_ENCODING);
                let has_payload_semantics =
                    method == Method::POST || method == Method::PUT || method == Method::PATCH;
                if has_payload_semantics && !headers.contains_key(header::CONTENT_LENGTH) {
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
                }
                Outgoing::None
            }
            RequestBody::Bytes(bytes) => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len() as u64));
                if bytes.is_empty() {
                    Outgoing::None
                } else {
                    Outgoing::Fixed(bytes)
                }
            }
            RequestBody::Stream(stream) => {
                let declared = headers
                    .get(header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                let chunked = declared.is_none();
                if chunked {
                    headers.remove(header::CONTENT_LENGTH);
                    headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                }
                Outgoing::Stream {
                    stream,
                    chunked,
                    declared,
                }
            }
        };

        if !headers.contains_key(header::CONNECTION) {
            let value = if keep_alive { "keep-alive" } else { "close" };
            headers.insert(header::CONNECTION, HeaderValue::from_static(value));
        }

        let expect_continue = !body.is_none()
            && headers
                .get(header::EXPECT)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"));

        Ok(Self {
            method,
            target,
            headers,
            body,
            expect_continue,
        })
    }

    fn requests_close(&self) -> bool {
        codec::has_token(&self.headers, &header::CONNECTION, "close")
    }
}

/// Drives one request from connection acquisition to the final response head.
pub(crate) struct Exchange {
    request_id: RequestId,
    agent: Arc<dyn Agent>,
    key: PoolKey,
    state: ExchangeState,
    wire: Option<Wire>,
    settled: SettleOnce,
    continue_timeout: Option<Duration>,
}

fn transition(request_id: RequestId, state: &mut ExchangeState, next: ExchangeState) {
    tracing::trace!(request_id = %request_id, from = ?*state, to = ?next, "Exchange transition");
    *state = next;
}

impl Exchange {
    pub(crate) fn new(
        request_id: RequestId,
        agent: Arc<dyn Agent>,
        key: PoolKey,
        continue_timeout: Option<Duration>,
    ) -> Self {
        Self {
            request_id,
            agent,
            key,
            state: ExchangeState::Idle,
            wire: None,
            settled: SettleOnce::new(),
            continue_timeout,
        }
    }

    pub(crate) fn state(&self) -> ExchangeState {
        self.state
    }

    /// Run until the final response head is received.
    ///
    /// On success the socket stays in `self` until [`Exchange::complete`].
    pub(crate) async fn run(
        &mut self,
        request: PreparedRequest,
    ) -> Result<ResponseHead, TransportError> {
        let request_id = self.request_id;
        transition(request_id, &mut self.state, ExchangeState::Connecting);

        let conn = self.agent.acquire(&self.key).await?;
        tracing::debug!(
            request_id = %request_id,
            connection_id = %conn.id(),
            reused = conn.is_reused(),
            "Connection acquired"
        );
        let wire = self.wire.insert(Wire::new(conn));
        if request.requests_close() {
            wire.mark_not_reusable();
        }

        let PreparedRequest {
            method,
            target,
            headers,
            body,
            expect_continue,
        } = request;

        wire.write(&codec::encode_head(&method, &target, &headers)).await?;
        wire.flush().await?;

        if expect_continue {
            transition(request_id, &mut self.state, ExchangeState::AwaitingContinue);
            if let Some(head) = await_continue(wire, self.continue_timeout).await? {
                // The peer answered before accepting the body; it is never sent.
                tracing::debug!(request_id = %request_id, status = head.status, "Final response before 100-continue, body suppressed");
                wire.mark_not_reusable();
                transition(request_id, &mut self.state, ExchangeState::AwaitingResponse);
                return Ok(head);
            }
        }

        transition(request_id, &mut self.state, ExchangeState::Sending);
        send_body(wire, body).await?;

        transition(request_id, &mut self.state, ExchangeState::AwaitingResponse);
        wire.read_final_head().await
    }

    /// Commit success and hand the socket to the response body.
    pub(crate) fn complete(&mut self, head: &ResponseHead) -> Option<Wire> {
        if !self.settled.try_settle() {
            return None;
        }
        transition(self.request_id, &mut self.state, ExchangeState::Completed);
        let mut wire = self.wire.take()?;
        if head.wants_close() || !self.agent.keep_alive() {
            wire.mark_not_reusable();
        }
        Some(wire)
    }

    /// Commit a failure; the socket, if any, is closed rather than reused.
    pub(crate) fn fail(&mut self, err: &TransportError) {
        if !self.settled.try_settle() {
            return;
        }
        transition(self.request_id, &mut self.state, ExchangeState::Failed(err.kind()));
        self.wire = None;
    }

    /// Commit an abort: forcefully tear down the socket, at most once.
    pub(crate) fn abort(&mut self) -> bool {
        if !self.settled.try_settle() {
            return false;
        }
        transition(
            self.request_id,
            &mut self.state,
            ExchangeState::Failed(ErrorKind::Aborted),
        );
        if let Some(wire) = self.wire.take() {
            wire.abort();
        }
        true
    }
}

/// Wait for `100 Continue`.
///
/// Returns `Some(head)` when a final response arrives instead, `None` when the
/// body should be sent (continue received or the optional timer elapsed).
async fn await_continue(
    wire: &mut Wire,
    timeout: Option<Duration>,
) -> Result<Option<ResponseHead>, TransportError> {
    let wait = async {
        loop {
            let head = wire.read_head().await?;
            if head.is_continue() {
                return Ok(None);
            }
            if !head.is_interim() {
                return Ok(Some(head));
            }
        }
    };

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(timeout_ms = limit.as_millis() as u64, "No 100-continue received, sending body");
                Ok(None)
            }
        },
        None => wait.await,
    }
}

async fn send_body(wire: &mut Wire, body: Outgoing) -> Result<(), TransportError> {
    match body {
        Outgoing::None => {}
        Outgoing::Fixed(bytes) => wire.write(&bytes).await?,
        Outgoing::Stream {
            stream,
            chunked,
            declared,
        } => pipe(wire, stream, chunked, declared).await?,
    }
    wire.flush().await
}

/// Copy a body stream onto the socket, one chunk at a time.
///
/// Each chunk is fully written before the next is pulled, so a slow peer
/// slows the source.
async fn pipe(
    wire: &mut Wire,
    mut stream: BodyStream,
    chunked: bool,
    declared: Option<u64>,
) -> Result<(), TransportError> {
    let mut sent: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransportError::stream(e.to_string()))?;
        if chunk.is_empty() {
            continue;
        }
        sent += chunk.len() as u64;
        if declared.is_some_and(|limit| sent > limit) {
            return Err(TransportError::stream(
                "body stream longer than declared content-length",
            ));
        }
        if chunked {
            wire.write(&codec::encode_chunk(&chunk)).await?;
        } else {
            wire.write(&chunk).await?;
        }
    }

    if declared.is_some_and(|limit| sent < limit) {
        return Err(TransportError::stream(
            "body stream shorter than declared content-length",
        ));
    }
    if chunked {
        wire.write(LAST_CHUNK).await?;
    }
    Ok(())
}
