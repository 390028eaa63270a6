//! Embeddable HTTP(S) server core.
//!
//! Applications register a chain of handlers; the server offers each request
//! to them in order, streams request and response bodies without buffering
//! them whole, serves static resources with range and conditional support,
//! publishes Server-Sent Events, and can swap its TLS identity while running.

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod http;
pub mod net;

// Handlers built on the core
pub mod resource;
pub mod sse;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ServerConfig;
pub use dispatch::{AsyncContext, AsyncHandler, ClaimFuture, SyncHandler};
pub use error::{HandlerError, ServerError, WriteError};
pub use http::{Request, Response, Server, ServerBuilder};
pub use lifecycle::shutdown::Shutdown;
pub use net::TlsContext;
pub use resource::ResourceHandler;
pub use sse::{AsyncSsePublisher, SsePublisher};
