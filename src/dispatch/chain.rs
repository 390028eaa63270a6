//! Ordered handler chain.
//!
//! # Responsibilities
//! - Offer a request to each handler in registration order
//! - Stop at the first handler that claims it
//! - Answer 404 when nobody claims it and 500 when a claim fails
//!
//! # Design Decisions
//! - Each claim is awaited before the next handler is consulted
//! - Panics in claim code are caught and treated like returned errors

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::FutureExt;

use crate::dispatch::context::AsyncContext;
use crate::dispatch::handler::AsyncHandler;
use crate::error::HandlerError;

/// Result of offering a request to the chain.
pub enum Dispatch {
    /// A handler claimed the request.
    Claimed(Arc<dyn AsyncHandler>),
    /// No handler claimed it; a 404 was sent.
    Unclaimed,
    /// A claim failed; a 500 was sent.
    Failed,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Claimed(handler) => f.debug_tuple("Claimed").field(&handler.name()).finish(),
            Dispatch::Unclaimed => f.write_str("Unclaimed"),
            Dispatch::Failed => f.write_str("Failed"),
        }
    }
}

/// Immutable, ordered list of handlers. Cheap to clone.
#[derive(Clone)]
pub struct HandlerChain {
    handlers: Arc<[Arc<dyn AsyncHandler>]>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<Arc<dyn AsyncHandler>>) -> Self {
        Self {
            handlers: handlers.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offer the request in `ctx` to each handler until one claims it.
    pub async fn dispatch(&self, ctx: &AsyncContext) -> Dispatch {
        let headers = ctx.request().headers();

        for handler in self.handlers.iter() {
            let claim = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                handler.on_headers(ctx, headers)
            })) {
                Ok(claim) => AssertUnwindSafe(claim)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload))),
                Err(payload) => Err(HandlerError::from_panic(payload)),
            };

            match claim {
                Ok(true) => {
                    tracing::debug!(
                        connection_id = %ctx.connection_id(),
                        handler = handler.name(),
                        path = ctx.request().path(),
                        "Request claimed"
                    );
                    return Dispatch::Claimed(Arc::clone(handler));
                }
                Ok(false) => continue,
                Err(e) => {
                    ctx.fail(e);
                    return Dispatch::Failed;
                }
            }
        }

        tracing::debug!(
            connection_id = %ctx.connection_id(),
            path = ctx.request().path(),
            "No handler claimed request"
        );
        ctx.response()
            .finish_with_text(StatusCode::NOT_FOUND, "404 Not Found");
        Dispatch::Unclaimed
    }
}
