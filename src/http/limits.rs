//! Request head limits.
//!
//! # Responsibilities
//! - Reject request targets longer than `max_url_size` with 414
//! - Reject header blocks larger than `max_headers_size` with 431
//! - Build the plain-text rejection that closes the connection
//!
//! # Design Decisions
//! - Checked before any handler sees the request
//! - Header size counts the wire form `name: value\r\n` of every field

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::request::Parts;

use crate::config::LimitsConfig;
use crate::error::DecodeError;

/// Bytes a header block occupies on the wire.
pub fn header_block_size(parts: &Parts) -> usize {
    parts
        .headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum()
}

/// Length of the request target as sent on the request line.
pub fn target_length(parts: &Parts) -> usize {
    match parts.uri.path_and_query() {
        Some(pq) if parts.uri.scheme().is_none() => pq.as_str().len(),
        _ => parts.uri.to_string().len(),
    }
}

/// Validate a request head against the configured limits.
pub fn check_request_head(parts: &Parts, limits: &LimitsConfig) -> Result<(), DecodeError> {
    let length = target_length(parts);
    if length > limits.max_url_size {
        return Err(DecodeError::UriTooLong {
            length,
            max: limits.max_url_size,
        });
    }

    let size = header_block_size(parts);
    if size > limits.max_headers_size {
        return Err(DecodeError::HeadersTooLarge {
            size,
            max: limits.max_headers_size,
        });
    }
    Ok(())
}

/// Plain-text response for a rejected request head. The connection is closed after it.
pub fn rejection(error: &DecodeError) -> axum::http::Response<Body> {
    let message = error.client_message();
    let mut response = axum::http::Response::new(Body::from(message));
    *response.status_mut() = error.status();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain;charset=utf-8"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(message.len()));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
