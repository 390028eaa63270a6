//! Incoming request view.
//!
//! # Responsibilities
//! - Expose method, target, headers, protocol tag and peer address
//! - Reconstruct the full request URI from scheme and `Host`
//! - Buffer body chunks delivered by the connection lane for handlers that
//!   pull the body instead of receiving it through callbacks
//!
//! # Design Decisions
//! - The head is immutable after construction and shared behind an `Arc`
//! - The body cursor is fed in arrival order and closed on request completion
//!   or when the connection drops mid-body

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Method, Uri, Version};
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::net::Protocol;

const DEFAULT_BODY_CAPACITY: usize = 16;

struct RequestInner {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    protocol: Protocol,
    remote_addr: SocketAddr,
    body: BodyCursor,
}

/// The request half of an exchange. Cheap to clone.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.inner.method)
            .field("uri", &self.inner.uri)
            .field("protocol", &self.inner.protocol)
            .field("remote_addr", &self.inner.remote_addr)
            .finish()
    }
}

impl Request {
    pub(crate) fn new(parts: Parts, protocol: Protocol, remote_addr: SocketAddr) -> Self {
        Self::with_body_capacity(parts, protocol, remote_addr, DEFAULT_BODY_CAPACITY)
    }

    /// Build a request whose body cursor buffers at most `body_capacity` chunks.
    pub(crate) fn with_body_capacity(
        parts: Parts,
        protocol: Protocol,
        remote_addr: SocketAddr,
        body_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                method: parts.method,
                uri: parts.uri,
                version: parts.version,
                headers: parts.headers,
                protocol,
                remote_addr,
                body: BodyCursor::new(body_capacity),
            }),
        }
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    /// Path component of the request target.
    pub fn path(&self) -> &str {
        self.inner.uri.path()
    }

    /// Query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.inner.uri.query()
    }

    pub fn version(&self) -> Version {
        self.inner.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Protocol the connection was accepted on.
    pub fn protocol(&self) -> Protocol {
        self.inner.protocol
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    /// Absolute URI as the client addressed it, e.g. `https://host:8443/a?b`.
    pub fn full_uri(&self) -> String {
        let uri = &self.inner.uri;
        if uri.scheme().is_some() {
            return uri.to_string();
        }
        let host = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| self.header(header::HOST).map(str::to_string))
            .unwrap_or_default();
        let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{}://{}{}", self.inner.protocol.scheme(), host, target)
    }

    /// Buffered request body, fed by the connection lane.
    pub fn body(&self) -> &BodyCursor {
        &self.inner.body
    }
}

/// Pull-style access to request body chunks.
///
/// Chunks appear in arrival order; `None` means the body has ended. The
/// buffer is bounded: while it is full the connection lane stops delivering
/// chunks, which in turn stops reads from the socket.
pub struct BodyCursor {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    aborted: AtomicBool,
}

impl BodyCursor {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            aborted: AtomicBool::new(false),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Wait until the buffer can take another chunk. Returns at once after
    /// the body has ended.
    pub(crate) async fn ready(&self) {
        if let Some(tx) = self.sender() {
            let _ = tx.reserve().await;
        }
    }

    /// Append a chunk. Ignored once the body has ended.
    ///
    /// The lane awaits [`ready`](Self::ready) before each delivery, so the
    /// buffer has room here.
    pub(crate) fn feed(&self, chunk: Bytes) {
        let Some(tx) = self.sender() else {
            return;
        };
        if let Err(e) = tx.try_send(chunk) {
            tracing::warn!(error = %e, "Dropping request body chunk");
        }
    }

    /// Mark the end of the body.
    pub(crate) fn finish(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// End the body early because the peer went away.
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.finish();
    }

    /// True if the body ended because the connection closed before all of
    /// it arrived. Chunks read so far are then a truncated body.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Next chunk, or `None` at end of body.
    pub async fn next_chunk(&self) -> Option<Bytes> {
        self.rx.lock().await.recv().await
    }

    /// Blocking variant of [`next_chunk`](Self::next_chunk) for worker threads.
    ///
    /// Panics if called from async code.
    pub fn blocking_next_chunk(&self) -> Option<Bytes> {
        self.rx.blocking_lock().blocking_recv()
    }

    /// Collect the remaining body.
    pub async fn read_to_end(&self) -> Bytes {
        let mut rx = self.rx.lock().await;
        let mut body = BytesMut::new();
        while let Some(chunk) = rx.recv().await {
            body.extend_from_slice(&chunk);
        }
        body.freeze()
    }

    /// Blocking variant of [`read_to_end`](Self::read_to_end) for worker threads.
    pub fn blocking_read_to_end(&self) -> Bytes {
        let mut rx = self.rx.blocking_lock();
        let mut body = BytesMut::new();
        while let Some(chunk) = rx.blocking_recv() {
            body.extend_from_slice(&chunk);
        }
        body.freeze()
    }
}
