//! Streaming response writer.
//!
//! # Responsibilities
//! - Hold status and headers until they are committed
//! - Stream body chunks to the transport without buffering the whole body
//! - Report each write's outcome once the transport has taken the bytes
//! - Complete the response exactly once
//!
//! # Design Decisions
//! - A per-response async mutex is the single-writer guard: `write` waits its
//!   turn, `write_with_callback` is rejected while another write is in flight
//! - Headers are committed by the first write or by completion; edits after
//!   that are ignored
//! - Peer disconnect surfaces as `WriteError::Disconnected`, never a panic
//!
//! # Data Flow
//! ```text
//! handler ── write(bytes) ──▶ [single-writer guard] ──▶ chunk queue ──▶ body stream ──▶ hyper
//!    ▲                                                                      │
//!    └─────────────── ack (bytes taken by transport) ◀──────────────────────┘
//! ```

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use futures_util::Stream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::error::WriteError;
use crate::observability::metrics;

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }
}

/// A body chunk plus the acknowledgement fired once the transport takes it.
struct Chunk {
    bytes: Bytes,
    ack: oneshot::Sender<()>,
}

/// Transport-facing half of the output channel.
struct Output {
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: Option<mpsc::UnboundedSender<Chunk>>,
}

impl Output {
    fn is_committed(&self) -> bool {
        self.head_tx.is_none()
    }

    fn commit(&mut self, head: &Mutex<ResponseHead>) {
        if let Some(tx) = self.head_tx.take() {
            let snapshot = lock(head).clone();
            // The connection may already be gone; the body sender reports that.
            let _ = tx.send(snapshot);
        }
    }
}

struct ResponseInner {
    head: Mutex<ResponseHead>,
    output: Mutex<Output>,
    writer: Arc<tokio::sync::Mutex<()>>,
    completed: AtomicBool,
    abandoned: AtomicBool,
    async_mode: AtomicBool,
    on_complete: Mutex<Option<oneshot::Sender<()>>>,
    method: Method,
    started: Instant,
    runtime: Handle,
}

/// The response half of an exchange.
///
/// Cheap to clone; every clone writes to the same output.
#[derive(Clone)]
pub struct Response {
    inner: Arc<ResponseInner>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status())
            .field("committed", &self.is_committed())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Resolves once the response has been completed.
pub(crate) type CompletionWatch = oneshot::Receiver<()>;

/// The transport's end of a response: head first, then the body stream.
pub(crate) struct ResponseReceiver {
    head_rx: oneshot::Receiver<ResponseHead>,
    body_rx: mpsc::UnboundedReceiver<Chunk>,
}

impl ResponseReceiver {
    /// Wait for the head to be committed and build the transport response.
    ///
    /// Returns `None` if the response was dropped without ever committing.
    pub(crate) async fn into_http(self) -> Option<axum::http::Response<Body>> {
        let head = self.head_rx.await.ok()?;
        let mut response = axum::http::Response::new(Body::from_stream(body_stream(self.body_rx)));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        Some(response)
    }
}

fn body_stream(
    body_rx: mpsc::UnboundedReceiver<Chunk>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures_util::stream::unfold(body_rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        let _ = chunk.ack.send(());
        Some((Ok(chunk.bytes), rx))
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Response {
    /// Create a response bound to the current runtime, with its transport end
    /// and a completion watch.
    pub(crate) fn channel(method: Method) -> (Response, ResponseReceiver, CompletionWatch) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let response = Response {
            inner: Arc::new(ResponseInner {
                head: Mutex::new(ResponseHead::default()),
                output: Mutex::new(Output {
                    head_tx: Some(head_tx),
                    body_tx: Some(body_tx),
                }),
                writer: Arc::new(tokio::sync::Mutex::new(())),
                completed: AtomicBool::new(false),
                abandoned: AtomicBool::new(false),
                async_mode: AtomicBool::new(false),
                on_complete: Mutex::new(Some(done_tx)),
                method,
                started: Instant::now(),
                runtime: Handle::current(),
            }),
        };
        (response, ResponseReceiver { head_rx, body_rx }, done_rx)
    }

    /// Current status code.
    pub fn status(&self) -> StatusCode {
        lock(&self.inner.head).status
    }

    /// Set the status code. Ignored once headers are committed.
    pub fn set_status(&self, status: StatusCode) {
        self.edit_head(|head| head.status = status);
    }

    /// Copy of the current headers.
    pub fn headers(&self) -> HeaderMap {
        lock(&self.inner.head).headers.clone()
    }

    /// Value of a single header, if set.
    pub fn header(&self, name: &HeaderName) -> Option<HeaderValue> {
        lock(&self.inner.head).headers.get(name).cloned()
    }

    /// Replace a header. Ignored once headers are committed.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.edit_head(|head| {
            head.headers.insert(name, value);
        });
    }

    /// Append a header value. Ignored once headers are committed.
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.edit_head(|head| {
            head.headers.append(name, value);
        });
    }

    /// Set the `Content-Type` header.
    pub fn set_content_type(&self, content_type: &str) {
        match HeaderValue::from_str(content_type) {
            Ok(value) => self.set_header(header::CONTENT_TYPE, value),
            Err(_) => tracing::warn!(content_type, "Ignoring invalid content type"),
        }
    }

    /// Set the `Content-Length` header.
    pub fn set_content_length(&self, length: u64) {
        self.set_header(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    fn edit_head(&self, edit: impl FnOnce(&mut ResponseHead)) {
        let output = lock(&self.inner.output);
        if output.is_committed() {
            tracing::debug!("Ignoring header change on a committed response");
            return;
        }
        edit(&mut lock(&self.inner.head));
    }

    /// Method of the request this response answers.
    pub fn request_method(&self) -> &Method {
        &self.inner.method
    }

    /// True once status and headers have been handed to the transport.
    pub fn is_committed(&self) -> bool {
        lock(&self.inner.output).is_committed()
    }

    /// True once the response has been completed.
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Hand status and headers to the transport now, before any body bytes.
    pub fn commit(&self) {
        let mut output = lock(&self.inner.output);
        output.commit(&self.inner.head);
    }

    /// Switch to long-lived mode: returning from a synchronous handler no
    /// longer completes the response; the owner must call `complete`.
    pub fn handle_async(&self) {
        self.inner.async_mode.store(true, Ordering::Release);
    }

    /// True if `handle_async` was called.
    pub fn is_async(&self) -> bool {
        self.inner.async_mode.load(Ordering::Acquire)
    }

    /// Queue a chunk behind the head. Callers must hold the writer guard.
    fn enqueue(&self, bytes: Bytes) -> Result<oneshot::Receiver<()>, WriteError> {
        let mut output = lock(&self.inner.output);
        if output.body_tx.is_none() {
            return Err(WriteError::Completed);
        }
        output.commit(&self.inner.head);

        let (ack_tx, ack_rx) = oneshot::channel();
        if bytes.is_empty() || self.inner.method == Method::HEAD {
            let _ = ack_tx.send(());
            return Ok(ack_rx);
        }
        match &output.body_tx {
            Some(tx) => tx
                .send(Chunk { bytes, ack: ack_tx })
                .map_err(|_| WriteError::Disconnected)?,
            None => return Err(WriteError::Completed),
        }
        Ok(ack_rx)
    }

    /// Write a chunk, waiting behind any write already in flight.
    ///
    /// Resolves once the transport has taken the bytes.
    pub async fn write(&self, bytes: impl Into<Bytes>) -> Result<(), WriteError> {
        let _turn = Arc::clone(&self.inner.writer).lock_owned().await;
        let ack = self.enqueue(bytes.into())?;
        ack.await.map_err(|_| WriteError::Disconnected)
    }

    /// Write a chunk and invoke `callback` with the outcome.
    ///
    /// If another write has not completed yet the callback receives
    /// `WriteError::WriteInProgress` immediately and nothing is written.
    pub fn write_with_callback<F>(&self, bytes: impl Into<Bytes>, callback: F)
    where
        F: FnOnce(Result<(), WriteError>) + Send + 'static,
    {
        let turn = match Arc::clone(&self.inner.writer).try_lock_owned() {
            Ok(turn) => turn,
            Err(_) => return callback(Err(WriteError::WriteInProgress)),
        };
        match self.enqueue(bytes.into()) {
            Ok(ack) => {
                self.inner.runtime.spawn(async move {
                    let result = ack.await.map_err(|_| WriteError::Disconnected);
                    drop(turn);
                    callback(result);
                });
            }
            Err(e) => {
                drop(turn);
                callback(Err(e));
            }
        }
    }

    /// Write a chunk from a thread that is not running async code.
    ///
    /// Panics if called from within the runtime; use `write` there.
    pub fn blocking_write(&self, bytes: impl Into<Bytes>) -> Result<(), WriteError> {
        let bytes = bytes.into();
        self.inner.runtime.block_on(self.write(bytes))
    }

    /// Send a complete body, setting `Content-Length` if headers are not yet
    /// committed. Does not complete the response.
    pub async fn send(&self, body: impl Into<Bytes>) -> Result<(), WriteError> {
        let body = body.into();
        if !self.is_committed() {
            self.set_content_length(body.len() as u64);
        }
        self.write(body).await
    }

    /// Send a plain-text body with the given status.
    pub async fn send_plain_text(&self, status: StatusCode, text: &str) -> Result<(), WriteError> {
        self.set_status(status);
        self.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain;charset=utf-8"),
        );
        self.send(Bytes::copy_from_slice(text.as_bytes())).await
    }

    /// Respond with `302 Found` pointing at `location`. Does not complete the response.
    pub fn redirect(&self, location: &str) {
        match HeaderValue::from_str(location) {
            Ok(value) => {
                self.set_status(StatusCode::FOUND);
                self.set_header(header::LOCATION, value);
                self.set_content_length(0);
            }
            Err(_) => tracing::warn!(location, "Ignoring redirect to invalid location"),
        }
    }

    /// Complete the response: commit headers if needed and end the body.
    ///
    /// Must be called exactly once. A second call panics in debug builds and
    /// is logged and ignored otherwise. Completing a response whose connection
    /// already went away is a no-op.
    pub fn complete(&self) {
        let first = self.try_complete();
        if first || self.inner.abandoned.load(Ordering::Acquire) {
            return;
        }
        tracing::error!(status = %self.status(), "Response completed more than once");
        debug_assert!(first, "request completed twice");
    }

    /// Complete on behalf of a handler whose connection is gone. The handler's
    /// own later `complete` is then accepted silently.
    pub(crate) fn abandon(&self) -> bool {
        self.inner.abandoned.store(true, Ordering::Release);
        self.try_complete()
    }

    /// Complete the response if nobody has yet. Returns `true` if this call completed it.
    pub(crate) fn try_complete(&self) -> bool {
        self.finish(|_| None)
    }

    /// Replace status and body with a plain-text message and complete, unless
    /// headers were already committed, in which case the response is only
    /// completed. Returns `false` if it was already complete.
    pub(crate) fn finish_with_text(&self, status: StatusCode, text: &str) -> bool {
        let body = Bytes::copy_from_slice(text.as_bytes());
        self.finish(move |head| {
            head.status = status;
            head.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain;charset=utf-8"),
            );
            head.headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
            Some(body)
        })
    }

    fn finish(&self, uncommitted: impl FnOnce(&mut ResponseHead) -> Option<Bytes>) -> bool {
        if self.inner.completed.swap(true, Ordering::AcqRel) {
            return false;
        }
        {
            let mut output = lock(&self.inner.output);
            if !output.is_committed() {
                let body = {
                    let mut head = lock(&self.inner.head);
                    let body = uncommitted(&mut head);
                    if body.is_none()
                        && !head.headers.contains_key(header::CONTENT_LENGTH)
                        && !head.headers.contains_key(header::TRANSFER_ENCODING)
                    {
                        head.headers
                            .insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
                    }
                    body
                };
                output.commit(&self.inner.head);
                if let (Some(bytes), Some(tx)) = (body, &output.body_tx) {
                    if self.inner.method != Method::HEAD {
                        let (ack, _) = oneshot::channel();
                        let _ = tx.send(Chunk { bytes, ack });
                    }
                }
            }
            // Dropping the sender ends the body once queued chunks drain.
            output.body_tx = None;
        }

        metrics::record_request(self.inner.method.as_str(), self.status().as_u16(), self.inner.started);
        if let Some(done) = lock(&self.inner.on_complete).take() {
            let _ = done.send(());
        }
        true
    }
}
