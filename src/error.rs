//! Error types shared across subsystems.
//!
//! # Design Decisions
//! - One enum per failure domain; handlers only ever see `HandlerError` and
//!   `WriteError`
//! - Range and conditional-header parse errors are recoverable and live next to
//!   the negotiator in `resource::negotiate`
//! - Transport decode failures carry the status code they map to

use axum::http::StatusCode;
use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::net::tls::TlsError;

/// Failure reported by a write on a [`Response`](crate::http::Response).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The peer closed the connection before the bytes were taken.
    #[error("peer disconnected before the write completed")]
    Disconnected,

    /// The response was already completed.
    #[error("response already completed")]
    Completed,

    /// Another write is still outstanding on this response.
    #[error("a previous write has not completed yet")]
    WriteInProgress,
}

/// Error raised by handler code during dispatch or body callbacks.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("write failed: {0}")]
    Write(#[from] WriteError),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Build an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Message(message.into())
    }

    /// Convert a panic payload into a handler error.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let text = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        HandlerError::Panicked(text)
    }
}

/// Oversized request head, detected before dispatch.
///
/// Unparsable request heads never reach this layer: hyper answers them with
/// `400 Bad Request` and closes the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("request target of {length} bytes exceeds limit of {max}")]
    UriTooLong { length: usize, max: usize },

    #[error("request headers of {size} bytes exceed limit of {max}")]
    HeadersTooLarge { size: usize, max: usize },
}

impl DecodeError {
    /// Status code sent back to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            DecodeError::UriTooLong { .. } => StatusCode::URI_TOO_LONG,
            DecodeError::HeadersTooLarge { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
        }
    }

    /// Plain-text body sent with the status.
    pub fn client_message(&self) -> &'static str {
        match self {
            DecodeError::UriTooLong { .. } => "URI too long",
            DecodeError::HeadersTooLarge { .. } => "HTTP headers too large",
        }
    }
}

/// Errors surfaced while starting or reconfiguring a server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server has no HTTPS listener")]
    HttpsDisabled,
}
