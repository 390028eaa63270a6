//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Server::stop → broadcast → accept loops exit → connections shut down
//!     gracefully → drain with timeout
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → binary calls Server::stop
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: remaining connections are reported, not awaited

pub mod shutdown;
pub mod signals;
