//! Server-Sent Events publishers.
//!
//! # Responsibilities
//! - Prepare a response for an event stream and commit its headers
//! - Serialize and write events, comments and reconnect hints
//! - Complete the response on `close`
//!
//! # Design Decisions
//! - Starting a publisher switches the response to long-lived mode, so a
//!   synchronous handler can return while events keep flowing
//! - `close` is idempotent; sends after it fail with `WriteError::Completed`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{self, HeaderValue};
use bytes::Bytes;

use crate::error::WriteError;
use crate::http::Response;
use crate::sse::frame;

struct Stream {
    response: Response,
    closed: AtomicBool,
}

impl Stream {
    fn start(response: &Response) -> Arc<Self> {
        response.set_header(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        response.set_header(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-transform"),
        );
        response.handle_async();
        response.commit();
        Arc::new(Self {
            response: response.clone(),
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> Result<(), WriteError> {
        if self.closed.load(Ordering::Acquire) {
            Err(WriteError::Completed)
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.response.try_complete();
        }
    }
}

/// Publisher whose sends are awaited.
///
/// Concurrent sends are written one after another, never interleaved.
#[derive(Clone)]
pub struct AsyncSsePublisher {
    stream: Arc<Stream>,
}

impl AsyncSsePublisher {
    /// Turn `response` into an event stream.
    pub fn start(response: &Response) -> Self {
        Self {
            stream: Stream::start(response),
        }
    }

    async fn write(&self, text: String) -> Result<(), WriteError> {
        self.stream.check_open()?;
        self.stream.response.write(Bytes::from(text)).await
    }

    /// Send a message event.
    pub async fn send(&self, message: &str) -> Result<(), WriteError> {
        self.write(frame::data_text(message, None, None)).await
    }

    /// Send a message with an event name and optional id.
    pub async fn send_event(
        &self,
        message: &str,
        event: Option<&str>,
        id: Option<&str>,
    ) -> Result<(), WriteError> {
        self.write(frame::data_text(message, event, id)).await
    }

    /// Send a comment line.
    pub async fn send_comment(&self, comment: &str) -> Result<(), WriteError> {
        self.write(frame::comment_text(comment)).await
    }

    /// Tell the client how long to wait before reconnecting.
    pub async fn set_client_reconnect_time(&self, delay: Duration) -> Result<(), WriteError> {
        self.write(frame::retry_text(delay)).await
    }

    /// End the stream and complete the request.
    pub fn close(&self) {
        self.stream.close();
    }

    pub fn is_closed(&self) -> bool {
        self.stream.closed.load(Ordering::Acquire)
    }
}

/// Publisher for threads that are not running async code.
///
/// Each send blocks until the transport has taken the bytes.
#[derive(Clone)]
pub struct SsePublisher {
    stream: Arc<Stream>,
}

impl SsePublisher {
    /// Turn `response` into an event stream.
    pub fn start(response: &Response) -> Self {
        Self {
            stream: Stream::start(response),
        }
    }

    fn write(&self, text: String) -> Result<(), WriteError> {
        self.stream.check_open()?;
        self.stream.response.blocking_write(Bytes::from(text))
    }

    pub fn send(&self, message: &str) -> Result<(), WriteError> {
        self.write(frame::data_text(message, None, None))
    }

    pub fn send_event(
        &self,
        message: &str,
        event: Option<&str>,
        id: Option<&str>,
    ) -> Result<(), WriteError> {
        self.write(frame::data_text(message, event, id))
    }

    pub fn send_comment(&self, comment: &str) -> Result<(), WriteError> {
        self.write(frame::comment_text(comment))
    }

    pub fn set_client_reconnect_time(&self, delay: Duration) -> Result<(), WriteError> {
        self.write(frame::retry_text(delay))
    }

    pub fn close(&self) {
        self.stream.close();
    }

    pub fn is_closed(&self) -> bool {
        self.stream.closed.load(Ordering::Acquire)
    }
}
