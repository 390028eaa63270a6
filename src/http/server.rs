//! Server assembly and connection serving.
//!
//! # Responsibilities
//! - Build a server from config plus registered handlers
//! - Bind the HTTP and HTTPS listeners and run their accept loops
//! - Give each HTTPS connection one snapshot of the active TLS identity
//! - Serve HTTP/1.1 on every connection and feed its connection lane
//! - Reject oversized request heads before dispatch
//! - Stop: stop accepting, shut connections down gracefully, drain
//!
//! # Design Decisions
//! - hyper's connection builder is used directly so each connection owns its
//!   lane and protocol tag
//! - Request bodies are pumped into the lane by a separate task that holds the
//!   lane's ordering lock, so body events of consecutive keep-alive requests
//!   never interleave
//! - The service future resolves as soon as the handler commits headers; the
//!   body streams afterwards

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Response as HttpResponse, StatusCode};
use futures_util::StreamExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use notify::RecommendedWatcher;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::config::{validate_config, ConfigError, LimitsConfig, ServerConfig};
use crate::dispatch::context::AsyncContext;
use crate::dispatch::handler::{AsyncHandler, SyncHandler, SyncHandlerAdapter};
use crate::dispatch::lane::{ConnectionLane, LaneEvent, LaneSender};
use crate::dispatch::{HandlerChain, WorkerPool};
use crate::error::ServerError;
use crate::http::limits;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::cert_watcher::CertWatcher;
use crate::net::listener::{Listener, ListenerError};
use crate::net::{ConnectionGuard, ConnectionId, ConnectionTracker, Protocol, TlsContext, TlsContextHolder};

const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder for [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    tls: Option<TlsContext>,
    async_handlers: Vec<Arc<dyn AsyncHandler>>,
    sync_handlers: Vec<Arc<dyn SyncHandler>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Plain HTTP on an ephemeral localhost port, HTTPS disabled.
    pub fn new() -> Self {
        let mut config = ServerConfig::default();
        config.listener.http_address = Some("127.0.0.1:0".to_string());
        config.listener.https_address = None;
        Self::from_config(config)
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            tls: None,
            async_handlers: Vec::new(),
            sync_handlers: Vec::new(),
        }
    }

    pub fn http_address(mut self, address: impl Into<String>) -> Self {
        self.config.listener.http_address = Some(address.into());
        self
    }

    pub fn disable_http(mut self) -> Self {
        self.config.listener.http_address = None;
        self
    }

    pub fn https_address(mut self, address: impl Into<String>) -> Self {
        self.config.listener.https_address = Some(address.into());
        self
    }

    pub fn disable_https(mut self) -> Self {
        self.config.listener.https_address = None;
        self
    }

    /// Identity for the HTTPS listener. Overrides configured certificate files.
    pub fn tls_context(mut self, context: TlsContext) -> Self {
        self.tls = Some(context);
        self
    }

    pub fn max_headers_size(mut self, bytes: usize) -> Self {
        self.config.limits.max_headers_size = bytes;
        self
    }

    pub fn max_url_size(mut self, bytes: usize) -> Self {
        self.config.limits.max_url_size = bytes;
        self
    }

    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.listener.max_connections = count;
        self
    }

    pub fn max_blocking_workers(mut self, count: usize) -> Self {
        self.config.workers.max_blocking = count;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.listener.drain_timeout_secs = timeout.as_secs();
        self
    }

    /// Append an async handler. Handlers are consulted in registration order.
    pub fn add_handler(mut self, handler: impl AsyncHandler) -> Self {
        self.async_handlers.push(Arc::new(handler));
        self
    }

    /// Append a shared async handler.
    pub fn add_shared_handler(mut self, handler: Arc<dyn AsyncHandler>) -> Self {
        self.async_handlers.push(handler);
        self
    }

    /// Append a sync handler. Sync handlers run after every async handler.
    pub fn add_sync_handler(mut self, handler: impl SyncHandler) -> Self {
        self.sync_handlers.push(Arc::new(handler));
        self
    }

    fn chain(&mut self) -> HandlerChain {
        let mut handlers = std::mem::take(&mut self.async_handlers);
        if !self.sync_handlers.is_empty() {
            let adapter = SyncHandlerAdapter::new(std::mem::take(&mut self.sync_handlers));
            handlers.push(Arc::new(adapter));
        }
        HandlerChain::new(handlers)
    }

    fn tls_holder(&mut self) -> Result<Option<Arc<TlsContextHolder>>, ServerError> {
        if self.config.listener.https_address.is_none() {
            return Ok(None);
        }
        let context = match (self.tls.take(), &self.config.tls) {
            (Some(context), _) => context,
            (None, Some(tls)) => {
                TlsContext::from_pem_files(Path::new(&tls.cert_path), Path::new(&tls.key_path))?
            }
            (None, None) => {
                tracing::warn!("HTTPS enabled without an identity, using a self-signed localhost certificate");
                TlsContext::unsigned_localhost()?
            }
        };
        Ok(Some(Arc::new(TlsContextHolder::new(context))))
    }

    /// Bind listeners and start serving.
    pub async fn start(mut self) -> Result<Server, ServerError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let chain = self.chain();
        let explicit_identity = self.tls.is_some();
        let tls = self.tls_holder()?;
        let cert_watcher = match (&tls, &self.config.tls) {
            (Some(holder), Some(files)) if files.watch && !explicit_identity => {
                let watcher = CertWatcher::new(
                    Path::new(&files.cert_path),
                    Path::new(&files.key_path),
                    Arc::clone(holder),
                );
                match watcher.run() {
                    Ok(watcher) => Some(watcher),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to watch certificate files");
                        None
                    }
                }
            }
            _ => None,
        };

        let shared = Arc::new(Shared {
            chain,
            workers: WorkerPool::new(self.config.workers.max_blocking),
            limits: self.config.limits.clone(),
            tracker: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
        });

        let max_connections = self.config.listener.max_connections;
        let mut accept_tasks = Vec::new();
        let mut http_addr = None;
        let mut https_addr = None;

        if let Some(address) = &self.config.listener.http_address {
            let listener = bind(address, max_connections).await?;
            http_addr = Some(listener.local_addr()?);
            accept_tasks.push(tokio::spawn(accept_loop(
                listener,
                Protocol::Http,
                None,
                Arc::clone(&shared),
            )));
        }

        if let (Some(address), Some(holder)) = (&self.config.listener.https_address, &tls) {
            let listener = bind(address, max_connections).await?;
            https_addr = Some(listener.local_addr()?);
            accept_tasks.push(tokio::spawn(accept_loop(
                listener,
                Protocol::Https,
                Some(Arc::clone(holder)),
                Arc::clone(&shared),
            )));
        }

        tracing::info!(
            http = ?http_addr,
            https = ?https_addr,
            handlers = shared.chain.len(),
            "Server started"
        );

        Ok(Server {
            http_addr,
            https_addr,
            tls,
            shared,
            accept_tasks,
            drain_timeout: Duration::from_secs(self.config.listener.drain_timeout_secs),
            _cert_watcher: cert_watcher,
        })
    }
}

async fn bind(address: &str, max_connections: usize) -> Result<Listener, ServerError> {
    Listener::bind(address, max_connections)
        .await
        .map_err(|e| match e {
            ListenerError::Bind { address, source } => ServerError::Bind { address, source },
            other => ServerError::Io(std::io::Error::other(other.to_string())),
        })
}

/// State shared by every connection of a server.
struct Shared {
    chain: HandlerChain,
    workers: WorkerPool,
    limits: LimitsConfig,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
}

/// A running server.
pub struct Server {
    http_addr: Option<SocketAddr>,
    https_addr: Option<SocketAddr>,
    tls: Option<Arc<TlsContextHolder>>,
    shared: Arc<Shared>,
    accept_tasks: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
    _cert_watcher: Option<RecommendedWatcher>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    pub fn https_addr(&self) -> Option<SocketAddr> {
        self.https_addr
    }

    /// Base URI of the HTTP listener, e.g. `http://127.0.0.1:8080`.
    pub fn http_uri(&self) -> Option<String> {
        self.http_addr.map(|addr| format!("http://{addr}"))
    }

    /// Base URI of the HTTPS listener, named by `localhost` to match the
    /// default certificate.
    pub fn https_uri(&self) -> Option<String> {
        self.https_addr
            .map(|addr| format!("https://localhost:{}", addr.port()))
    }

    /// HTTP URI if plain HTTP is enabled, otherwise the HTTPS URI.
    pub fn uri(&self) -> String {
        self.http_uri()
            .or_else(|| self.https_uri())
            .unwrap_or_default()
    }

    /// Replace the TLS identity. Connections accepted after this returns use
    /// the new identity; established ones keep theirs.
    pub fn change_tls_context(&self, context: TlsContext) -> Result<(), ServerError> {
        let holder = self.tls.as_ref().ok_or(ServerError::HttpsDisabled)?;
        holder.change_context(context);
        Ok(())
    }

    /// The identity new HTTPS connections are handed right now.
    pub fn tls_context(&self) -> Option<Arc<TlsContext>> {
        self.tls.as_ref().map(|holder| holder.snapshot())
    }

    /// Connections currently open across both listeners.
    pub fn active_connections(&self) -> u64 {
        self.shared.tracker.active_count()
    }

    /// Stop accepting, ask open connections to finish their current
    /// exchange, and wait up to the drain timeout for them to close.
    pub async fn stop(mut self) {
        tracing::info!("Stopping server");
        self.shared.shutdown.trigger();
        for task in self.accept_tasks.drain(..) {
            let _ = task.await;
        }

        if self.shared.tracker.wait_for_drain(self.drain_timeout).await {
            tracing::info!("Server stopped");
        } else {
            tracing::warn!(
                remaining = self.shared.tracker.active_count(),
                "Drain timeout elapsed with connections still open"
            );
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.shutdown.trigger();
    }
}

async fn accept_loop(
    listener: Listener,
    protocol: Protocol,
    tls: Option<Arc<TlsContextHolder>>,
    shared: Arc<Shared>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer, permit) = match accepted {
            Ok(accepted) => accepted,
            Err(ListenerError::Closed) => break,
            Err(e) => {
                tracing::warn!(error = %e, protocol = %protocol, "Accept failed");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let guard = shared.tracker.track(protocol);
        // Bound to the identity active at accept time.
        let acceptor = tls.as_ref().map(|holder| holder.acceptor());
        let connection_shutdown = shared.shutdown.subscribe();
        let shared = Arc::clone(&shared);

        tokio::spawn(async move {
            let _permit = permit;
            match acceptor {
                None => serve_connection(stream, peer, guard, shared, connection_shutdown).await,
                Some(acceptor) => {
                    match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                        Ok(Ok(tls_stream)) => {
                            serve_connection(tls_stream, peer, guard, shared, connection_shutdown).await
                        }
                        Ok(Err(e)) => {
                            tracing::debug!(peer_addr = %peer, error = %e, "TLS handshake failed")
                        }
                        Err(_) => tracing::debug!(peer_addr = %peer, "TLS handshake timed out"),
                    }
                }
            }
        });
    }
    tracing::info!(protocol = %protocol, "Listener stopped");
}

/// Per-connection values captured by the service.
struct ConnectionScope {
    id: ConnectionId,
    protocol: Protocol,
    peer: SocketAddr,
    lane: LaneSender,
    shared: Arc<Shared>,
}

async fn serve_connection<IO>(
    io: IO,
    peer: SocketAddr,
    guard: ConnectionGuard,
    shared: Arc<Shared>,
    mut shutdown: broadcast::Receiver<()>,
) where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let limits = &shared.limits;
    let max_buf_size = (limits.max_headers_size + limits.max_url_size + 4096).max(8192);
    let scope = Arc::new(ConnectionScope {
        id: guard.id(),
        protocol: guard.protocol(),
        peer,
        lane: ConnectionLane::spawn(
            guard.id(),
            guard.protocol(),
            shared.chain.clone(),
            limits.body_queue_depth,
        ),
        shared: Arc::clone(&shared),
    });

    tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, protocol = %guard.protocol(), "Connection opened");

    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let scope = Arc::clone(&scope);
        async move { Ok::<_, Infallible>(scope.exchange(request).await) }
    });

    let connection = http1::Builder::new()
        .keep_alive(true)
        .max_buf_size(max_buf_size)
        .serve_connection(TokioIo::new(io), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };
    if let Err(e) = result {
        tracing::debug!(connection_id = %guard.id(), error = %e, "Connection ended with error");
    }
    tracing::debug!(connection_id = %guard.id(), "Connection closed");
}

impl ConnectionScope {
    async fn exchange(&self, request: hyper::Request<Incoming>) -> HttpResponse<Body> {
        let (parts, body) = request.into_parts();

        if let Err(e) = limits::check_request_head(&parts, &self.shared.limits) {
            tracing::warn!(
                connection_id = %self.id,
                peer_addr = %self.peer,
                error = %e,
                "Rejecting request head"
            );
            return limits::rejection(&e);
        }

        let (response, receiver, done) = Response::channel(parts.method.clone());
        let request = Request::with_body_capacity(
            parts,
            self.protocol,
            self.peer,
            self.shared.limits.body_queue_depth,
        );
        tracing::debug!(
            connection_id = %self.id,
            method = %request.method(),
            path = request.path(),
            "Request received"
        );
        let ctx = AsyncContext::new(request, response, self.shared.workers.clone(), self.id);

        let lane = Arc::clone(&self.lane).lock_owned().await;
        if lane.send(LaneEvent::Headers { ctx, done }).await.is_err() {
            tracing::error!(connection_id = %self.id, "Connection lane closed");
            return plain_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
        tokio::spawn(pump_body(body, lane, self.id));

        match receiver.into_http().await {
            Some(response) => response,
            None => {
                tracing::error!(connection_id = %self.id, "Response dropped before headers were sent");
                plain_status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// Forward request body chunks to the lane, then signal the end of the body,
/// or its abort if the peer went away mid-body.
/// Holding `lane` keeps the next request's events behind this one's.
async fn pump_body(body: Incoming, lane: OwnedMutexGuard<mpsc::Sender<LaneEvent>>, id: ConnectionId) {
    let mut chunks = Body::new(body).into_data_stream();
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(bytes) if bytes.is_empty() => continue,
            Ok(bytes) => {
                if lane.send(LaneEvent::Data(bytes)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "Request body aborted");
                let _ = lane.send(LaneEvent::Aborted).await;
                return;
            }
        }
    }
    let _ = lane.send(LaneEvent::Complete).await;
}

fn plain_status(status: StatusCode) -> HttpResponse<Body> {
    let mut response = HttpResponse::new(Body::empty());
    *response.status_mut() = status;
    response
}
