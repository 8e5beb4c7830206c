//! Outbound publish seam.

use async_trait::async_trait;
use bytes::Bytes;
use livebridge_core::TransportError;
use livebridge_core::metrics::TRANSPORT_PUBLISH_FAILURES_TOTAL;
use tracing::warn;

/// Something that can put a message on the broker.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;
}

/// Fire-and-forget publish: failures are logged and counted, never returned.
///
/// Callers waiting on a reply rely on their own timeout instead.
pub async fn publish_quietly(publisher: &dyn Publisher, topic: &str, payload: Bytes) {
    if let Err(error) = publisher.publish(topic, payload).await {
        metrics::counter!(TRANSPORT_PUBLISH_FAILURES_TOTAL).increment(1);
        warn!(%topic, %error, "publish failed, dropping message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBroker;
    use livebridge_logging::capture_logs;
    use tracing::Level;

    #[tokio::test]
    async fn quiet_publish_records_on_success() {
        let broker = MemoryBroker::new();
        publish_quietly(&broker, "/live/req/ping", Bytes::from_static(b"{}")).await;
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn quiet_publish_logs_failure() {
        let (logs, _guard) = capture_logs();
        let broker = MemoryBroker::new();
        broker.set_failing(true);

        publish_quietly(&broker, "/live/req/ping", Bytes::new()).await;

        assert!(broker.published().is_empty());
        assert!(logs.has_event(Level::WARN, "publish failed"));
    }
}
