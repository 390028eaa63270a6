//! Per-connection event lane.
//!
//! # Responsibilities
//! - Serialize every event of one connection: headers, body chunks, body end
//! - Track the in-flight exchange (`State`) and clear it on completion
//! - Route body events only to the handler that claimed the request
//!
//! # Design Decisions
//! - One task per connection owns the state; no locks around it
//! - The event queue is bounded, so a slow handler back-pressures the
//!   transport instead of buffering unbounded body data
//! - Events for an unclaimed, failed or already completed request are dropped
//! - A body chunk is only handed over once the request's body cursor has
//!   room, so a claimer that has not read its body yet stalls the queue
//! - When the peer goes away mid-body, or the lane shuts down with an exchange
//!   still open, the body cursor is aborted and the response completed
//!
//! # Data Flow
//! ```text
//! service fn ── Headers ──┐
//! body pump ─── Data* ────┼──▶ [bounded queue] ──▶ lane task ──▶ chain / claimed handler
//! body pump ─── Complete ─┤
//! body pump ─── Aborted ──┘
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::dispatch::chain::{Dispatch, HandlerChain};
use crate::dispatch::context::AsyncContext;
use crate::dispatch::handler::AsyncHandler;
use crate::error::HandlerError;
use crate::http::response::CompletionWatch;
use crate::net::{ConnectionId, Protocol};

/// Event delivered to a connection lane.
pub(crate) enum LaneEvent {
    Headers {
        ctx: AsyncContext,
        done: CompletionWatch,
    },
    Data(Bytes),
    Complete,
    /// The request body ended early because the connection failed.
    Aborted,
}

/// Sending side of a lane.
///
/// The mutex orders requests: a request holds it from its `Headers` event
/// until its last body event has been queued.
pub(crate) type LaneSender = Arc<Mutex<mpsc::Sender<LaneEvent>>>;

/// The exchange currently in flight on a connection.
struct State {
    ctx: AsyncContext,
    handler: Arc<dyn AsyncHandler>,
    done: CompletionWatch,
}

enum Next {
    Cleared,
    Event(Option<LaneEvent>),
}

pub(crate) struct ConnectionLane {
    connection_id: ConnectionId,
    protocol: Protocol,
    chain: HandlerChain,
    events: mpsc::Receiver<LaneEvent>,
    state: Option<State>,
}

impl ConnectionLane {
    /// Start a lane task for a connection and return its sender.
    pub(crate) fn spawn(
        connection_id: ConnectionId,
        protocol: Protocol,
        chain: HandlerChain,
        queue_depth: usize,
    ) -> LaneSender {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let lane = ConnectionLane {
            connection_id,
            protocol,
            chain,
            events: rx,
            state: None,
        };
        tokio::spawn(lane.run());
        Arc::new(Mutex::new(tx))
    }

    async fn run(mut self) {
        tracing::trace!(connection_id = %self.connection_id, protocol = %self.protocol, "Lane started");
        loop {
            let next = match self.state.as_mut() {
                Some(state) => tokio::select! {
                    biased;
                    _ = &mut state.done => Next::Cleared,
                    event = self.events.recv() => Next::Event(event),
                },
                None => Next::Event(self.events.recv().await),
            };

            match next {
                Next::Cleared => {
                    tracing::trace!(connection_id = %self.connection_id, "Exchange completed");
                    self.state = None;
                }
                Next::Event(Some(event)) => self.handle(event).await,
                Next::Event(None) => break,
            }
        }

        if let Some(state) = self.state.take() {
            self.abandon(state, "Connection closed with an exchange still open");
        }
    }

    /// Release everything waiting on an exchange whose connection is gone:
    /// body readers see the end of the body, and the response is completed.
    fn abandon(&self, state: State, reason: &'static str) {
        state.ctx.request().body().abort();
        if state.ctx.response().abandon() {
            tracing::debug!(
                connection_id = %self.connection_id,
                path = state.ctx.request().path(),
                handler = state.handler.name(),
                "{reason}"
            );
        }
    }

    async fn handle(&mut self, event: LaneEvent) {
        match event {
            LaneEvent::Headers { ctx, done } => {
                if let Some(previous) = self.state.take() {
                    tracing::debug!(
                        connection_id = %self.connection_id,
                        path = previous.ctx.request().path(),
                        "New request while previous exchange still open"
                    );
                }
                if let Dispatch::Claimed(handler) = self.chain.dispatch(&ctx).await {
                    self.state = Some(State { ctx, handler, done });
                }
            }
            LaneEvent::Data(chunk) => {
                let Some(state) = self.state.as_mut() else {
                    tracing::debug!(
                        connection_id = %self.connection_id,
                        bytes = chunk.len(),
                        "Discarding body chunk for unclaimed request"
                    );
                    return;
                };
                let has_room = tokio::select! {
                    biased;
                    _ = &mut state.done => false,
                    _ = state.ctx.request().body().ready() => true,
                };
                if !has_room {
                    tracing::debug!(
                        connection_id = %self.connection_id,
                        bytes = chunk.len(),
                        "Discarding body chunk, exchange completed before reading its body"
                    );
                    self.state = None;
                    return;
                }
                let result = deliver(|| state.handler.on_request_data(&state.ctx, chunk));
                self.after_delivery(result);
            }
            LaneEvent::Complete => {
                let Some(state) = self.state.as_ref() else {
                    return;
                };
                let result = deliver(|| state.handler.on_request_complete(&state.ctx));
                self.after_delivery(result);
            }
            LaneEvent::Aborted => {
                if let Some(state) = self.state.take() {
                    self.abandon(state, "Peer disconnected before the request body ended");
                }
            }
        }
    }

    fn after_delivery(&mut self, result: Result<(), HandlerError>) {
        if let Err(e) = result {
            if let Some(state) = self.state.take() {
                state.ctx.fail(e);
            }
        }
    }
}

fn deliver(callback: impl FnOnce() -> Result<(), HandlerError>) -> Result<(), HandlerError> {
    std::panic::catch_unwind(AssertUnwindSafe(callback))
        .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload)))
}
