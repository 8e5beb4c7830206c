//! In-process broker stand-in.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use livebridge_core::{Envelope, TopicPattern, TransportError};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::publisher::Publisher;

const OUTBOUND_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    published: Vec<Envelope>,
    failing: bool,
}

/// A [`Publisher`] that keeps every message in memory.
///
/// Published envelopes are recorded and also broadcast to
/// [`outbound`](Self::outbound) receivers, so a test can play the remote
/// controller and answer requests as they appear.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
    outbound: broadcast::Sender<Envelope>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            outbound,
        }
    }

    /// Make every subsequent publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<Envelope> {
        self.inner.lock().published.clone()
    }

    /// Published envelopes whose topic matches `pattern`.
    pub fn published_matching(&self, pattern: &str) -> Vec<Envelope> {
        let pattern = TopicPattern::parse(pattern);
        self.inner
            .lock()
            .published
            .iter()
            .filter(|e| pattern.matches(e.topic()))
            .cloned()
            .collect()
    }

    /// Subscribe to envelopes published from now on.
    pub fn outbound(&self) -> broadcast::Receiver<Envelope> {
        self.outbound.subscribe()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        let envelope = Envelope::new(topic, payload);
        {
            let mut inner = self.inner.lock();
            if inner.failing {
                return Err(TransportError::Publish {
                    topic: topic.to_owned(),
                    message: "broker unavailable".into(),
                });
            }
            inner.published.push(envelope.clone());
        }
        // No receivers is fine.
        let _ = self.outbound.send(envelope);
        Ok(())
    }
}
