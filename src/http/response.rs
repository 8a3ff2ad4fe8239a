//! Abstract response and its streaming body.
//!
//! # Responsibilities
//! - Expose status and headers as soon as the head is parsed
//! - Stream the body lazily off the socket, at most once
//! - Return the socket to the agent only after a clean, complete read
//!
//! # Design Decisions
//! - Body errors surface on the body stream; `handle` has already settled
//! - Dropping an unfinished body closes its socket
//! - The request's abort signal keeps applying while the body is read

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use http::HeaderMap;

use crate::agent::Agent;
use crate::error::TransportError;
use crate::http::codec::{BodyFraming, Chunk, ChunkedDecoder};
use crate::http::exchange::Wire;
use crate::lifecycle::AbortSignal;

/// Transport-agnostic response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

/// Non-restartable stream of body chunks.
pub struct ResponseBody {
    inner: BoxStream<'static, Result<Bytes, TransportError>>,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self {
            inner: stream::empty().boxed(),
        }
    }

    /// A body backed by an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Self::empty();
        }
        Self {
            inner: stream::once(async move { Ok(bytes) }).boxed(),
        }
    }

    pub(crate) fn from_reader(reader: BodyReader, signal: Option<AbortSignal>) -> Self {
        let inner = stream::unfold(Some((reader, signal)), |state| async move {
            let (mut reader, signal) = state?;
            let next = match &signal {
                Some(signal) => {
                    let next = tokio::select! {
                        biased;
                        _ = signal.cancelled() => None,
                        next = reader.next_chunk() => Some(next),
                    };
                    match next {
                        Some(next) => next,
                        None => {
                            reader.abort();
                            return Some((Err(TransportError::Aborted), None));
                        }
                    }
                }
                None => reader.next_chunk().await,
            };

            match next {
                Ok(Some(chunk)) => Some((Ok(chunk), Some((reader, signal)))),
                Ok(None) => {
                    reader.finish();
                    None
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Response body failed");
                    Some((Err(e), None))
                }
            }
        })
        .fuse()
        .boxed();
        Self { inner }
    }

    /// Read the remaining body into one buffer.
    pub async fn collect(mut self) -> Result<Bytes, TransportError> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody").finish_non_exhaustive()
    }
}

/// Decodes the body framing off a socket.
pub(crate) struct BodyReader {
    wire: Wire,
    framing: BodyFraming,
    remaining: u64,
    chunked: ChunkedDecoder,
    agent: Arc<dyn Agent>,
}

impl BodyReader {
    pub(crate) fn new(mut wire: Wire, framing: BodyFraming, agent: Arc<dyn Agent>) -> Self {
        let remaining = match framing {
            BodyFraming::Length(n) => n,
            BodyFraming::CloseDelimited => {
                wire.mark_not_reusable();
                0
            }
            _ => 0,
        };
        Self {
            wire,
            framing,
            remaining,
            chunked: ChunkedDecoder::new(),
            agent,
        }
    }

    fn truncated() -> TransportError {
        TransportError::network("socket hang up: response body truncated")
    }

    /// Next body chunk, or `None` at the end of the body.
    pub(crate) async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.framing {
            BodyFraming::Empty => Ok(None),
            BodyFraming::Length(_) => {
                if self.remaining == 0 {
                    return Ok(None);
                }
                if self.wire.buffer_mut().is_empty() && self.wire.fill().await? == 0 {
                    return Err(Self::truncated());
                }
                let buf = self.wire.buffer_mut();
                let n = self.remaining.min(buf.len() as u64);
                self.remaining -= n;
                Ok(Some(buf.split_to(n as usize).freeze()))
            }
            BodyFraming::Chunked => loop {
                match self.chunked.decode(self.wire.buffer_mut())? {
                    Some(Chunk::Data(data)) => return Ok(Some(data)),
                    Some(Chunk::End) => return Ok(None),
                    None => {
                        if self.wire.fill().await? == 0 {
                            return Err(Self::truncated());
                        }
                    }
                }
            },
            BodyFraming::CloseDelimited => {
                if self.wire.buffer_mut().is_empty() && self.wire.fill().await? == 0 {
                    return Ok(None);
                }
                let buf = self.wire.buffer_mut();
                Ok(Some(buf.split().freeze()))
            }
        }
    }

    /// The body was read to completion: recycle or close the socket.
    pub(crate) fn finish(self) {
        if self.wire.is_reusable() {
            self.agent.release(self.wire.into_connection());
        }
    }

    fn abort(self) {
        self.wire.abort();
    }
}
