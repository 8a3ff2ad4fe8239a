//! HTTP/1.1 wire encoding and decoding.
//!
//! # Responsibilities
//! - Serialize the request line and headers
//! - Parse response status lines and headers (interim and final)
//! - Decide response body framing (RFC 9112 §6.3)
//! - Encode and decode chunked transfer coding

use bytes::{Buf, Bytes, BytesMut};
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method};

use crate::error::TransportError;

/// Upper bound on a response head before it is rejected.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

const MAX_HEADERS: usize = 128;
const MAX_CHUNK_LINE: usize = 4 * 1024;

/// Terminating chunk of a chunked body, with no trailers.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Serialize `METHOD target HTTP/1.1` plus headers and the blank line.
pub fn encode_head(method: &Method, target: &str, headers: &HeaderMap) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Frame one chunk of a chunked request body.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// A parsed response status line and header block.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    pub version: u8,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// 1xx other than 101 Switching Protocols.
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status) && self.status != 101
    }

    pub fn is_continue(&self) -> bool {
        self.status == 100
    }

    /// Whether the connection cannot carry another exchange after this
    /// response. A 101 hands the socket over to another protocol.
    pub fn wants_close(&self) -> bool {
        if self.status == 101 || has_token(&self.headers, &header::CONNECTION, "close") {
            return true;
        }
        self.version == 0 && !has_token(&self.headers, &header::CONNECTION, "keep-alive")
    }
}

/// Try to parse a response head from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed; consumed bytes are removed
/// from `buf` only on success.
pub fn parse_response_head(buf: &mut BytesMut) -> Result<Option<ResponseHead>, TransportError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut slots);

    let consumed = match response.parse(&buf[..]) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            if buf.len() > MAX_HEAD_SIZE {
                return Err(TransportError::network("response head too large"));
            }
            return Ok(None);
        }
        Err(e) => {
            return Err(TransportError::network(format!(
                "malformed response head: {}",
                e
            )))
        }
    };

    let status = response
        .code
        .ok_or_else(|| TransportError::network("response missing status code"))?;
    let version = response.version.unwrap_or(1);

    let mut headers = HeaderMap::with_capacity(response.headers.len());
    for h in response.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| {
            TransportError::network(format!("invalid response header name: {}", h.name))
        })?;
        let value = HeaderValue::from_bytes(h.value).map_err(|_| {
            TransportError::network(format!("invalid value for response header {}", h.name))
        })?;
        headers.append(name, value);
    }

    buf.advance(consumed);
    Ok(Some(ResponseHead {
        status,
        version,
        headers,
    }))
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    Chunked,
    /// Read until the peer closes; the socket cannot be reused.
    CloseDelimited,
}

impl BodyFraming {
    pub fn for_response(method: &Method, head: &ResponseHead) -> Result<Self, TransportError> {
        if method == Method::HEAD
            || (100..200).contains(&head.status)
            || head.status == 204
            || head.status == 304
        {
            return Ok(BodyFraming::Empty);
        }

        if head.headers.contains_key(header::TRANSFER_ENCODING) {
            return Ok(if last_coding_is_chunked(&head.headers) {
                BodyFraming::Chunked
            } else {
                BodyFraming::CloseDelimited
            });
        }

        let mut length: Option<u64> = None;
        for value in head.headers.get_all(header::CONTENT_LENGTH) {
            let parsed = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| TransportError::network("invalid content-length in response"))?;
            if length.is_some_and(|l| l != parsed) {
                return Err(TransportError::network(
                    "conflicting content-length values in response",
                ));
            }
            length = Some(parsed);
        }

        Ok(match length {
            Some(0) => BodyFraming::Empty,
            Some(n) => BodyFraming::Length(n),
            None => BodyFraming::CloseDelimited,
        })
    }
}

fn last_coding_is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .last()
        .is_some_and(|c| c.eq_ignore_ascii_case("chunked"))
}

/// Whether a comma-separated header contains `token` (case-insensitive).
pub fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Output of [`ChunkedDecoder::decode`].
#[derive(Debug, PartialEq, Eq)]
pub enum Chunk {
    Data(Bytes),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

/// Incremental decoder for `transfer-encoding: chunked`.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self {
            state: ChunkState::Size,
        }
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `buf` as possible. `Ok(None)` means more input is needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Chunk>, TransportError> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(None);
                    };
                    let size_str = line[..].split(|b| *b == b';').next().unwrap_or_default();
                    let size = std::str::from_utf8(size_str)
                        .ok()
                        .and_then(|s| u64::from_str_radix(s.trim(), 16).ok())
                        .ok_or_else(|| TransportError::network("invalid chunk size"))?;
                    self.state = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let n = remaining.min(buf.len() as u64);
                    let data = buf.split_to(n as usize).freeze();
                    self.state = if n == remaining {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(remaining - n)
                    };
                    return Ok(Some(Chunk::Data(data)));
                }
                ChunkState::DataEnd => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(TransportError::network("missing CRLF after chunk data"));
                    }
                    buf.advance(2);
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                    }
                }
                ChunkState::Done => return Ok(Some(Chunk::End)),
            }
        }
    }
}

/// Split one CRLF-terminated line off `buf`, without the terminator.
fn take_line(buf: &mut BytesMut) -> Result<Option<BytesMut>, TransportError> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            let line = buf.split_to(pos);
            buf.advance(2);
            Ok(Some(line))
        }
        None if buf.len() > MAX_CHUNK_LINE => {
            Err(TransportError::network("chunk framing line too long"))
        }
        None => Ok(None),
    }
}
