//! Server-Sent Events.
//!
//! # Data Flow
//! ```text
//! handler
//!     → publisher.rs (start: headers + long-lived mode; send; close)
//!     → frame.rs (id / event / data lines, comments, retry)
//!     → response writer
//! ```

pub mod frame;
pub mod publisher;

pub use publisher::{AsyncSsePublisher, SsePublisher};
