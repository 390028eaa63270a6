//! Handler traits and the synchronous handler adapter.
//!
//! # Responsibilities
//! - `AsyncHandler`: claim a request from its headers, then receive body
//!   events if it claimed
//! - `SyncHandler`: blocking request/response handler for simple endpoints
//! - `SyncHandlerAdapter`: run registered sync handlers as the last link of
//!   the async chain, on the worker pool
//!
//! # Design Decisions
//! - Only the claiming handler sees body events
//! - The adapter claims unconditionally and resolves the request itself
//!   (404 when no sync handler accepts it), so body chunks are never held back
//!   behind a blocked worker
//! - Returning from a sync handler completes the response unless it switched
//!   to long-lived mode with `Response::handle_async`

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;

use crate::dispatch::context::{AsyncContext, ClaimFuture};
use crate::error::HandlerError;
use crate::http::{Request, Response};

/// Asynchronous request handler.
///
/// Only the handler whose claim resolved to `true` receives
/// `on_request_data` and `on_request_complete`. The default body callbacks
/// buffer chunks into [`Request::body`] so claimed handlers may pull the body
/// instead of overriding them.
pub trait AsyncHandler: Send + Sync + 'static {
    /// Decide whether to handle the request.
    fn on_headers(&self, ctx: &AsyncContext, headers: &HeaderMap) -> ClaimFuture;

    /// A body chunk arrived for a request this handler claimed.
    fn on_request_data(&self, ctx: &AsyncContext, chunk: Bytes) -> Result<(), HandlerError> {
        ctx.request().body().feed(chunk);
        Ok(())
    }

    /// The request body ended.
    fn on_request_complete(&self, ctx: &AsyncContext) -> Result<(), HandlerError> {
        ctx.request().body().finish();
        Ok(())
    }

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Blocking request handler. Returns `true` if it handled the request.
pub trait SyncHandler: Send + Sync + 'static {
    fn handle(&self, request: &Request, response: &Response) -> Result<bool, HandlerError>;
}

impl<F> SyncHandler for F
where
    F: Fn(&Request, &Response) -> Result<bool, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, request: &Request, response: &Response) -> Result<bool, HandlerError> {
        self(request, response)
    }
}

/// Runs sync handlers in registration order on the worker pool.
#[derive(Clone)]
pub struct SyncHandlerAdapter {
    handlers: Arc<[Arc<dyn SyncHandler>]>,
}

impl SyncHandlerAdapter {
    pub fn new(handlers: Vec<Arc<dyn SyncHandler>>) -> Self {
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
}

fn run_sync_handlers(
    handlers: &[Arc<dyn SyncHandler>],
    request: &Request,
    response: &Response,
) -> Result<bool, HandlerError> {
    for handler in handlers {
        if handler.handle(request, response)? {
            return Ok(true);
        }
    }
    Ok(false)
}

impl AsyncHandler for SyncHandlerAdapter {
    fn on_headers(&self, ctx: &AsyncContext, _headers: &HeaderMap) -> ClaimFuture {
        let handlers = Arc::clone(&self.handlers);
        let ctx_for_task = ctx.clone();

        ctx.spawn(async move {
            let ctx = ctx_for_task;
            let request = ctx.request().clone();
            let response = ctx.response().clone();
            let outcome = ctx
                .workers()
                .run(move || run_sync_handlers(&handlers, &request, &response))
                .await
                .and_then(|result| result);

            match outcome {
                Ok(true) => {
                    if !ctx.response().is_async() {
                        ctx.response().try_complete();
                    }
                }
                Ok(false) => {
                    ctx.response()
                        .finish_with_text(StatusCode::NOT_FOUND, "404 Not Found");
                }
                Err(e) => {
                    ctx.fail(e);
                }
            }
        });

        ctx.handled()
    }
}
