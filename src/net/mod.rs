//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (snapshot of the active identity, optional handshake)
//!     → connection.rs (connection id, protocol tag, live count)
//!     → Hand off to HTTP layer
//!
//! Identity reload:
//!     cert_watcher.rs detects change
//!     → tls.rs loads new identity
//!     → atomic swap; only connections accepted afterwards see it
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod cert_watcher;
pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker, Protocol};
pub use tls::{TlsContext, TlsContextHolder, TlsError};
