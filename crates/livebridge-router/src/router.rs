//! Pattern table and the sequential dispatch loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use livebridge_core::metrics::{ROUTER_HANDLER_FAILURES_TOTAL, ROUTER_UNROUTED_TOTAL};
use livebridge_core::{Envelope, ProtocolError, TopicPattern};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handler::EventHandler;

struct Route {
    pattern: TopicPattern,
    handler: Arc<dyn EventHandler>,
}

/// Why [`EventRouter::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchStopped {
    /// The inbound channel closed.
    Closed,
    /// The cancellation token fired.
    Cancelled,
}

/// Routes envelopes to every handler whose pattern matches the topic.
///
/// Handlers for one message run one after another in registration order.
#[derive(Default)]
pub struct EventRouter {
    routes: Vec<Route>,
}

impl EventRouter {
    /// Create a router with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route topics matching `pattern` to `handler`.
    pub fn register_handler(
        &mut self,
        pattern: impl Into<TopicPattern>,
        handler: Arc<dyn EventHandler>,
    ) {
        let pattern = pattern.into();
        debug!(%pattern, handler = handler.name(), "registering handler");
        self.routes.push(Route { pattern, handler });
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Dispatch one envelope. Returns how many handlers ran.
    pub async fn on_message(&self, envelope: &Envelope) -> usize {
        let mut invoked = 0;
        for route in &self.routes {
            if !route.pattern.matches(envelope.topic()) {
                continue;
            }
            invoked += 1;

            let name = route.handler.name();
            let fut = AssertUnwindSafe(route.handler.handle(envelope));
            match fut.catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(handler = name, topic = envelope.topic(), %error, "handler failed");
                    metrics::counter!(ROUTER_HANDLER_FAILURES_TOTAL, "handler" => name.to_owned())
                        .increment(1);
                }
                Err(panic) => {
                    warn!(
                        handler = name,
                        topic = envelope.topic(),
                        panic = panic_message(panic.as_ref()),
                        "handler panicked"
                    );
                    metrics::counter!(ROUTER_HANDLER_FAILURES_TOTAL, "handler" => name.to_owned())
                        .increment(1);
                }
            }
        }

        if invoked == 0 {
            let error = ProtocolError::NoHandler {
                topic: envelope.topic().to_owned(),
            };
            debug!(%error, "dropping unrouted message");
            metrics::counter!(ROUTER_UNROUTED_TOTAL).increment(1);
        }
        invoked
    }

    /// Consume `rx` one message at a time until it closes or `cancel` fires.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<Envelope>,
        cancel: CancellationToken,
    ) -> DispatchStopped {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("dispatch loop cancelled");
                    return DispatchStopped::Cancelled;
                }
                next = rx.recv() => {
                    let Some(envelope) = next else {
                        info!("inbound stream closed, dispatch loop exiting");
                        return DispatchStopped::Closed;
                    };
                    let _ = self.on_message(&envelope).await;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
