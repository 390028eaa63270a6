//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept, TLS snapshot, hyper HTTP/1.1 connection)
//!     → limits.rs (414 / 431 before dispatch)
//!     → request.rs (immutable head, body cursor)
//!     → [dispatch lane offers the request to the handler chain]
//!     → response.rs (single-writer streaming body, exactly-once completion)
//!     → Send to client
//! ```

pub mod limits;
pub mod request;
pub mod response;
pub mod server;

pub use request::{BodyCursor, Request};
pub use response::{Response, ResponseHead};
pub use server::{Server, ServerBuilder};
