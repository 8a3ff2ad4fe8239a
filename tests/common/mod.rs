//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use http_transport::net::{Connection, ConnectionTracker, Io};
use http_transport::observability::logging::init_logging;
use http_transport::{
    Agent, AgentConfig, HandlerConfig, HttpHandler, PoolKey, PooledConnection, TlsOptions,
    TransportError,
};
use rcgen::{CertificateParams, KeyPair};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;

/// Server side of a test connection, plaintext or TLS.
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> PeerStream for T {}

pub type Peer = Box<dyn PeerStream>;

/// Start a plaintext backend that runs `f` for every accepted connection.
/// Returns the bound port.
pub async fn start_backend<F, Fut>(f: F) -> u16
where
    F: Fn(Peer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move { f(Box::new(socket)).await });
        }
    });
    port
}

/// A self-signed certificate for `localhost`.
pub struct TestCert {
    pub pem: String,
    pub der: CertificateDer<'static>,
    pub key_der: Vec<u8>,
}

pub fn self_signed_cert() -> TestCert {
    let key = KeyPair::generate().unwrap();
    let cert = CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();
    TestCert {
        pem: cert.pem(),
        der: cert.der().clone(),
        key_der: key.serialize_der(),
    }
}

/// Start a TLS backend. Returns the bound port and the certificate it serves.
pub async fn start_tls_backend<F, Fut>(f: F) -> (u16, TestCert)
where
    F: Fn(Peer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cert = self_signed_cert();
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![cert.der.clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_der.clone())),
        )
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let f = f.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                // Handshake failures are expected in verification tests.
                if let Ok(stream) = acceptor.accept(socket).await {
                    f(Box::new(stream)).await;
                }
            });
        }
    });
    (port, cert)
}

/// A port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// A request head read off a peer, plus any body bytes read past it.
pub struct RequestHead {
    pub text: String,
    pub leftover: Vec<u8>,
}

impl RequestHead {
    /// Value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<String> {
        self.text.lines().skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.trim()
                .eq_ignore_ascii_case(name)
                .then(|| v.trim().to_string())
        })
    }

    pub fn request_line(&self) -> &str {
        self.text.lines().next().unwrap_or("")
    }
}

/// Read one request head. Returns `None` if the peer closed first.
pub async fn read_request_head(peer: &mut Peer) -> Option<RequestHead> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let text = String::from_utf8_lossy(&buf[..end]).into_owned();
            let leftover = buf[end + 4..].to_vec();
            return Some(RequestHead { text, leftover });
        }
        match peer.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Read exactly `len` body bytes, starting with what the head read left over.
pub async fn read_body(peer: &mut Peer, head: &RequestHead, len: usize) -> Vec<u8> {
    let mut body = head.leftover.clone();
    let mut chunk = [0u8; 4096];
    while body.len() < len {
        match peer.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }
    body
}

/// Read a chunked request body up to and including the last chunk.
pub async fn read_chunked_body(peer: &mut Peer, head: &RequestHead) -> Vec<u8> {
    let mut raw = head.leftover.clone();
    let mut chunk = [0u8; 4096];
    while !raw.ends_with(b"0\r\n\r\n") {
        match peer.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
        }
    }
    raw
}

/// Handler with default configuration.
pub fn handler() -> HttpHandler {
    let config = HandlerConfig::default();
    init_logging(&config.observability);
    HttpHandler::new(config).unwrap()
}

/// Handler that accepts any server certificate.
pub fn insecure_handler() -> HttpHandler {
    let config = HandlerConfig {
        agent: AgentConfig {
            tls: TlsOptions {
                reject_unauthorized: false,
                ..TlsOptions::default()
            },
            ..AgentConfig::default()
        },
        ..HandlerConfig::default()
    };
    HttpHandler::new(config).unwrap()
}

/// Observations made by a [`RecordingIo`].
#[derive(Debug, Default)]
pub struct IoLog {
    pub writes: Mutex<Vec<Vec<u8>>>,
    pub aborts: AtomicUsize,
}

impl IoLog {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

/// In-memory socket that records every write and forceful abort.
pub struct RecordingIo {
    inner: DuplexStream,
    log: Arc<IoLog>,
}

impl AsyncRead for RecordingIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RecordingIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.log.writes.lock().unwrap().push(buf[..*n].to_vec());
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Io for RecordingIo {
    fn abort(&mut self) {
        self.log.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

type PeerFn = dyn Fn(Peer) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;

/// Agent that hands out in-memory sockets whose far end runs a scripted peer.
pub struct RecordingAgent {
    peer: Arc<PeerFn>,
    tracker: ConnectionTracker,
    pub log: Arc<IoLog>,
    pub acquired: AtomicUsize,
    pub destroyed: AtomicUsize,
}

impl RecordingAgent {
    pub fn new<F, Fut>(peer: F) -> Arc<Self>
    where
        F: Fn(Peer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Self {
            peer: Arc::new(move |p| Box::pin(peer(p))),
            tracker: ConnectionTracker::new(),
            log: Arc::new(IoLog::default()),
            acquired: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        })
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn handler(self: &Arc<Self>) -> HttpHandler {
        HttpHandler::with_agent(self.clone(), HandlerConfig::default())
    }
}

impl std::fmt::Debug for RecordingAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingAgent").finish_non_exhaustive()
    }
}

#[async_trait]
impl Agent for RecordingAgent {
    async fn acquire(&self, key: &PoolKey) -> Result<PooledConnection, TransportError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn((self.peer)(Box::new(server)));

        let io = RecordingIo {
            inner: client,
            log: self.log.clone(),
        };
        let conn = Connection::new(key.protocol, io, self.tracker.track());
        Ok(PooledConnection::new(key.clone(), conn, false, None))
    }

    fn release(&self, _conn: PooledConnection) {}

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn keep_alive(&self) -> bool {
        false
    }
}
