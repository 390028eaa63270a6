//! Per-request context handed to handlers.
//!
//! # Responsibilities
//! - Bundle request, response, worker pool and connection identity
//! - Offer the claim shortcuts `handled` / `not_handled` and `submit`
//! - Turn handler failures into a 500 carrying an incident id
//!
//! # Design Decisions
//! - Completion is delegated to the response, which enforces exactly-once
//! - Incident ids are logged with the full error and sent to the client alone

use std::future::Future;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;

use crate::dispatch::worker::WorkerPool;
use crate::error::HandlerError;
use crate::http::{Request, Response};
use crate::net::ConnectionId;
use crate::observability::metrics;

/// Outcome of a handler's claim decision.
pub type ClaimFuture = BoxFuture<'static, Result<bool, HandlerError>>;

struct ContextInner {
    request: Request,
    response: Response,
    workers: WorkerPool,
    connection_id: ConnectionId,
}

/// Context for one request/response exchange. Cheap to clone.
#[derive(Clone)]
pub struct AsyncContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for AsyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncContext")
            .field("connection_id", &self.inner.connection_id)
            .field("request", &self.inner.request)
            .field("response", &self.inner.response)
            .finish()
    }
}

impl AsyncContext {
    pub(crate) fn new(
        request: Request,
        response: Response,
        workers: WorkerPool,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request,
                response,
                workers,
                connection_id,
            }),
        }
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub fn response(&self) -> &Response {
        &self.inner.response
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection_id
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.inner.workers
    }

    /// Claim resolved immediately as handled.
    pub fn handled(&self) -> ClaimFuture {
        future::ready(Ok(true)).boxed()
    }

    /// Claim resolved immediately as declined.
    pub fn not_handled(&self) -> ClaimFuture {
        future::ready(Ok(false)).boxed()
    }

    /// Run blocking work on the worker pool; its result is the claim decision.
    pub fn submit<F>(&self, task: F) -> ClaimFuture
    where
        F: FnOnce() -> Result<bool, HandlerError> + Send + 'static,
    {
        let workers = self.inner.workers.clone();
        async move { workers.run(task).await? }.boxed()
    }

    /// Run a future on the runtime, detached from the connection lane.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(task);
    }

    /// Finish the exchange. Must be called exactly once per request.
    pub fn complete(&self) {
        self.inner.response.complete();
    }

    pub fn is_completed(&self) -> bool {
        self.inner.response.is_completed()
    }

    /// Report a handler failure: log it under a fresh incident id and, unless
    /// the response is already committed, answer with a 500 naming that id.
    /// Always completes the response. Returns the incident id.
    pub fn fail(&self, error: HandlerError) -> String {
        let incident = new_incident_id();
        let request = &self.inner.request;
        tracing::error!(
            incident_id = %incident,
            connection_id = %self.inner.connection_id,
            method = %request.method(),
            uri = %request.uri(),
            error = %error,
            details = ?error,
            "Unhandled error while processing request"
        );
        metrics::record_handler_error();

        let response = &self.inner.response;
        let message = format!("500 Internal Server Error - ID {incident}");
        if !response.finish_with_text(StatusCode::INTERNAL_SERVER_ERROR, &message) {
            tracing::debug!(incident_id = %incident, "Response already completed before failure");
        }
        incident
    }
}

/// Incident id for correlating a client-visible 500 with the server log.
pub fn new_incident_id() -> String {
    format!("ER-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Request as HttpRequest};

    fn context() -> (AsyncContext, crate::http::response::ResponseReceiver) {
        let (parts, _) = HttpRequest::builder().uri("/x").body(()).unwrap().into_parts();
        let request = Request::new(parts, crate::net::Protocol::Http, "127.0.0.1:1".parse().unwrap());
        let (response, receiver, _done) = Response::channel(Method::GET);
        let ctx = AsyncContext::new(request, response, WorkerPool::new(2), ConnectionId::new());
        (ctx, receiver)
    }

    #[test]
    fn incident_ids_are_prefixed_and_unique() {
        let a = new_incident_id();
        let b = new_incident_id();
        assert!(a.starts_with("ER-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn submit_resolves_claim_from_worker() {
        let (ctx, _rx) = context();
        assert!(ctx.submit(|| Ok(true)).await.unwrap());
        assert!(!ctx.submit(|| Ok(false)).await.unwrap());
        assert!(ctx.submit(|| Err(HandlerError::msg("nope"))).await.is_err());
    }

    #[tokio::test]
    async fn fail_sends_500_with_incident_id() {
        let (ctx, rx) = context();
        let incident = ctx.fail(HandlerError::msg("database unavailable"));
        assert!(ctx.is_completed());

        let response = rx.into_http().await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(text, format!("500 Internal Server Error - ID {incident}"));
        assert!(!text.contains("database"));
    }

    #[tokio::test]
    async fn fail_after_completion_keeps_original_response() {
        let (ctx, rx) = context();
        ctx.response().set_status(StatusCode::ACCEPTED);
        ctx.complete();
        ctx.fail(HandlerError::msg("late"));

        let response = rx.into_http().await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
