//! Abstract request description.
//!
//! # Responsibilities
//! - Describe one HTTP exchange independently of any socket library
//! - Carry the body as nothing, a fixed buffer, or a byte stream
//! - Generate a unique request ID for tracing
//!
//! # Design Decisions
//! - `protocol` stays a string; unsupported schemes are rejected at dispatch
//!   by the transport, not at construction
//! - Requests are moved into the handler and never mutated afterwards

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;
use uuid::Uuid;

use crate::error::TransportError;
use crate::lifecycle::AbortSignal;

/// Boxed error yielded by caller-supplied body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A streaming request body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// Transport selected by the request's declared scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// Parse `http:` / `https:` (the trailing colon is optional).
    pub fn parse(protocol: &str) -> Result<Self, TransportError> {
        match protocol.trim_end_matches(':').to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(TransportError::network(format!(
                "Protocol \"{}\" not supported. Expected \"http:\" or \"https:\"",
                protocol
            ))),
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http:",
            Protocol::Https => "https:",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body.
#[derive(Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    Stream(BodyStream),
}

impl RequestBody {
    /// Wrap any fallible byte stream.
    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        RequestBody::Stream(Box::pin(stream.map_err(|e| -> BoxError { e.into() })))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(bytes.into())
    }
}

impl From<&'static str> for RequestBody {
    fn from(s: &'static str) -> Self {
        RequestBody::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(s.into())
    }
}

/// Transport-agnostic description of one HTTP request.
#[derive(Debug)]
pub struct HttpRequest {
    /// `http:` or `https:`.
    pub protocol: String,
    pub hostname: String,
    /// Defaults to the protocol's well-known port.
    pub port: Option<u16>,
    pub method: Method,
    /// Absolute path, without the query string.
    pub path: String,
    /// Query parameters; an empty value list renders the bare key.
    pub query: BTreeMap<String, Vec<String>>,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(
        method: Method,
        protocol: impl Into<String>,
        hostname: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            hostname: hostname.into(),
            port: None,
            method,
            path: path.into(),
            query: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Build a request from a URL. Userinfo and fragment are ignored.
    pub fn from_url(method: Method, url: &Url) -> Result<Self, TransportError> {
        let hostname = url
            .host_str()
            .ok_or_else(|| TransportError::network(format!("URL has no host: {}", url)))?;

        let mut request = Self::new(method, format!("{}:", url.scheme()), hostname, url.path());
        request.port = url.port();
        for (key, value) in url.query_pairs() {
            request
                .query
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        Ok(request)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Append a header value (existing values for the name are kept).
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Request target as written on the request line: path plus query string.
    pub fn target(&self) -> String {
        let mut target = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        let mut pairs = Vec::new();
        for (key, values) in &self.query {
            let key = escape_uri(key);
            if values.is_empty() {
                pairs.push(key);
            } else {
                for value in values {
                    pairs.push(format!("{}={}", key, escape_uri(value)));
                }
            }
        }
        if !pairs.is_empty() {
            target.push('?');
            target.push_str(&pairs.join("&"));
        }
        target
    }
}

/// Everything outside the RFC 3986 unreserved set gets percent-encoded.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn escape_uri(input: &str) -> String {
    utf8_percent_encode(input, QUERY_ESCAPE).to_string()
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    pub abort_signal: Option<AbortSignal>,
}

impl HandlerOptions {
    pub fn with_abort_signal(signal: AbortSignal) -> Self {
        Self {
            abort_signal: Some(signal),
        }
    }
}

/// A unique request identifier for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parsing() {
        assert_eq!(Protocol::parse("http:").unwrap(), Protocol::Http);
        assert_eq!(Protocol::parse("HTTPS:").unwrap(), Protocol::Https);
        assert_eq!(Protocol::parse("https").unwrap(), Protocol::Https);

        let err = Protocol::parse("foo:").unwrap_err();
        assert!(!err.is_abort());
        assert!(err.to_string().contains("\"foo:\" not supported"));
    }

    #[test]
    fn target_sorts_and_escapes_query() {
        let request = HttpRequest::new(Method::GET, "http:", "example.com", "/search")
            .with_query("q", "a b&c")
            .with_query("a", "1")
            .with_query("a", "2");
        assert_eq!(request.target(), "/search?a=1&a=2&q=a%20b%26c");
    }

    #[test]
    fn target_keeps_unreserved_and_encodes_utf8() {
        let request = HttpRequest::new(Method::GET, "http:", "example.com", "/")
            .with_query("name", "caf\u{e9}~v1.0_x-y/z");
        assert_eq!(request.target(), "/?name=caf%C3%A9~v1.0_x-y%2Fz");
    }

    #[test]
    fn target_renders_bare_keys_and_fixes_relative_paths() {
        let mut request = HttpRequest::new(Method::GET, "http:", "example.com", "items");
        request.query.insert("flag".into(), Vec::new());
        assert_eq!(request.target(), "/items?flag");
    }

    #[test]
    fn from_url_splits_components() {
        let url = Url::parse("https://user:pw@example.com:8443/a/b?x=1&y=two#frag").unwrap();
        let request = HttpRequest::from_url(Method::PUT, &url).unwrap();
        assert_eq!(request.protocol, "https:");
        assert_eq!(request.hostname, "example.com");
        assert_eq!(request.port, Some(8443));
        assert_eq!(request.path, "/a/b");
        assert_eq!(request.target(), "/a/b?x=1&y=two");
    }

    #[test]
    fn body_conversions() {
        assert!(RequestBody::default().is_empty());
        assert!(matches!(RequestBody::from("test"), RequestBody::Bytes(b) if b == "test"));
        let stream = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from("x"))]);
        assert!(matches!(RequestBody::stream(stream), RequestBody::Stream(_)));
    }
}
