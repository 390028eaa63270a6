//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! request head
//!     → lane.rs (per-connection ordering, in-flight state)
//!     → chain.rs (offer to handlers in order, first claim wins)
//!     → handler.rs (claimed handler receives body events)
//!     → context.rs (response access, completion, failure reporting)
//!     → worker.rs (blocking work for sync handlers and `submit`)
//! ```
//!
//! # Design Decisions
//! - Exactly one handler owns a request once it is claimed
//! - Every request is completed exactly once: by its handler, or by the
//!   dispatcher with a 404 or a 500 incident response

pub mod chain;
pub mod context;
pub mod handler;
pub(crate) mod lane;
pub mod worker;

pub use chain::{Dispatch, HandlerChain};
pub use context::{new_incident_id, AsyncContext, ClaimFuture};
pub use handler::{AsyncHandler, SyncHandler, SyncHandlerAdapter};
pub use worker::WorkerPool;
