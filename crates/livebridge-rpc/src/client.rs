//! Typed calls on top of the registry and the deferred store.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use livebridge_core::{CorrelationId, OriginContext, RpcError, Topics};
use livebridge_transport::{Publisher, publish_quietly};
use serde::Serialize;
use tracing::debug;

use crate::calls::{RpcCall, RpcResponse};
use crate::deferred::PendingCallStore;
use crate::registry::RequestRegistry;

/// Entry point for the command layer.
///
/// For deferred kinds, the caller's origin is recorded from the registry's
/// registration hook, so a follow-up event can never arrive before the
/// record exists. If the direct reply fails in any way the record is
/// discarded again.
#[derive(Clone)]
pub struct LiveClient {
    registry: Arc<RequestRegistry>,
    deferred: Arc<PendingCallStore>,
    publisher: Arc<dyn Publisher>,
    default_timeout: Duration,
    deferred_ttl: Duration,
}

/// Lifetime of deferred records for kinds without their own.
pub const DEFAULT_DEFERRED_TTL: Duration = Duration::from_secs(60);

impl LiveClient {
    /// Create a client.
    pub fn new(
        registry: Arc<RequestRegistry>,
        deferred: Arc<PendingCallStore>,
        publisher: Arc<dyn Publisher>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            deferred,
            publisher,
            default_timeout,
            deferred_ttl: DEFAULT_DEFERRED_TTL,
        }
    }

    /// Override the default deferred record ttl.
    #[must_use]
    pub fn with_deferred_ttl(mut self, ttl: Duration) -> Self {
        self.deferred_ttl = ttl;
        self
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    /// The deferred store.
    pub fn deferred(&self) -> &Arc<PendingCallStore> {
        &self.deferred
    }

    fn topics(&self) -> &Topics {
        self.registry.topics()
    }

    /// Issue a typed call.
    ///
    /// `origin` is recorded only for deferred kinds.
    pub async fn call<C: RpcCall>(
        &self,
        call: &C,
        origin: Option<OriginContext>,
    ) -> Result<C::Response, RpcError> {
        let options = C::options();
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let payload = serde_json::to_value(call).map_err(|e| RpcError::Encode {
            namespace: C::NAME.to_owned(),
            message: e.to_string(),
        })?;

        let deferral = options
            .deferred
            .then(|| options.deferred_ttl.unwrap_or(self.deferred_ttl))
            .zip(origin);
        let mut recorded: Option<CorrelationId> = None;
        let deferred = &self.deferred;
        let result = self
            .registry
            .issue_with(C::NAME, payload, timeout, |id| {
                if let Some((ttl, origin)) = deferral {
                    deferred.register(id.clone(), origin, ttl);
                    recorded = Some(id.clone());
                }
            })
            .await;

        let outcome = result.and_then(|reply| decode::<C::Response>(C::NAME, reply));
        if let (Err(error), Some(id)) = (&outcome, &recorded) {
            if self.deferred.discard(id) {
                debug!(namespace = C::NAME, %id, %error, "discarded deferred record of failed call");
            }
        }
        outcome
    }

    /// Publish a spontaneous event to `<domain>/event/<kind>`.
    ///
    /// Fire-and-forget: transport failures are logged, not returned.
    pub async fn emit<T: Serialize + ?Sized>(&self, kind: &str, payload: &T) -> Result<(), RpcError> {
        let bytes = serde_json::to_vec(payload).map_err(|e| RpcError::Encode {
            namespace: kind.to_owned(),
            message: e.to_string(),
        })?;
        publish_quietly(
            self.publisher.as_ref(),
            &self.topics().event(kind),
            Bytes::from(bytes),
        )
        .await;
        Ok(())
    }
}

fn decode<R: RpcResponse>(namespace: &str, reply: serde_json::Value) -> Result<R, RpcError> {
    let response: R = serde_json::from_value(reply).map_err(|e| RpcError::Decode {
        namespace: namespace.to_owned(),
        message: e.to_string(),
    })?;
    match response.rejection() {
        Some(reason) => Err(RpcError::Remote {
            namespace: namespace.to_owned(),
            reason,
        }),
        None => Ok(response),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::{Playlist, ScreenRecord, SetEffect, WhacAMole};
    use assert_matches::assert_matches;
    use livebridge_core::Envelope;
    use livebridge_transport::MemoryBroker;
    use serde_json::{Value, json};

    struct Harness {
        broker: MemoryBroker,
        client: LiveClient,
    }

    fn harness() -> Harness {
        let broker = MemoryBroker::new();
        let publisher: Arc<dyn Publisher> = Arc::new(broker.clone());
        let registry = Arc::new(RequestRegistry::new(
            Arc::clone(&publisher),
            Topics::default(),
        ));
        let client = LiveClient::new(
            registry,
            Arc::new(PendingCallStore::new()),
            publisher,
            Duration::from_secs(10),
        );
        Harness { broker, client }
    }

    /// Answer the next request on `namespace` with `reply` (plus its id).
    fn answer(h: &Harness, namespace: &'static str, reply: Value) -> tokio::task::JoinHandle<String> {
        let mut rx = h.broker.outbound();
        let registry = Arc::clone(h.client.registry());
        tokio::spawn(async move {
            loop {
                let env: Envelope = rx.recv().await.unwrap();
                if env.topic() == format!("/live/req/{namespace}") {
                    let id = env.str_field("id").unwrap();
                    let mut reply = reply;
                    reply["id"] = Value::String(id.clone());
                    let _ = registry.deliver(namespace, &id, reply);
                    return id;
                }
            }
        })
    }

    fn origin() -> OriginContext {
        OriginContext::new(json!({"group": 42, "member": 7}))
    }

    #[tokio::test]
    async fn plain_call_decodes_response() {
        let h = harness();
        let responder = answer(
            &h,
            "playlist",
            json!({"queue": [{"uname": "a", "music_name": "b"}]}),
        );

        let resp = h.client.call(&Playlist, None).await.unwrap();
        assert_eq!(resp.queue.len(), 1);
        let _ = responder.await.unwrap();
        assert!(h.client.deferred().is_empty());
    }

    #[tokio::test]
    async fn deferred_call_keeps_origin_on_success() {
        let h = harness();
        let responder = answer(&h, "screen_record", json!({"succeed": true, "reason": ""}));

        let resp = h.client.call(&ScreenRecord, Some(origin())).await.unwrap();
        assert!(resp.succeed);

        let id = responder.await.unwrap();
        assert_eq!(h.client.deferred().resolve(&id), Some(origin()));
    }

    #[tokio::test]
    async fn remote_rejection_discards_record() {
        let h = harness();
        let responder = answer(&h, "whac_a_mole", json!({"position": -1}));

        let call = WhacAMole {
            openid: "o1".into(),
            avatar: "a.png".into(),
        };
        let result = h.client.call(&call, Some(origin())).await;

        assert_matches!(
            result,
            Err(RpcError::Remote { reason, .. }) if reason == "all slots are taken"
        );
        let id = responder.await.unwrap();
        assert!(!h.client.deferred().contains(&id));
    }

    #[tokio::test]
    async fn deferred_record_uses_client_ttl() {
        let mut h = harness();
        h.client = h.client.clone().with_deferred_ttl(Duration::from_secs(5));
        let responder = answer(&h, "screen_record", json!({"succeed": true}));

        let _ = h.client.call(&ScreenRecord, Some(origin())).await.unwrap();
        let _ = responder.await.unwrap();

        let records = h.client.deferred().snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].expires_at - records[0].created_at,
            chrono::TimeDelta::seconds(5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_discards_record() {
        let h = harness();
        let result = h.client.call(&ScreenRecord, Some(origin())).await;

        assert_matches!(result, Err(RpcError::Timeout { timeout_ms: 10_000, .. }));
        assert!(h.client.deferred().is_empty());
        assert_eq!(h.client.registry().pending_count(), 0);
    }

    #[tokio::test]
    async fn malformed_reply_is_decode_error() {
        let h = harness();
        let responder = answer(&h, "whac_a_mole", json!({"slot": 1}));

        let call = WhacAMole {
            openid: "o1".into(),
            avatar: "a.png".into(),
        };
        let result = h.client.call(&call, Some(origin())).await;
        assert_matches!(result, Err(RpcError::Decode { .. }));
        let _ = responder.await.unwrap();
        assert!(h.client.deferred().is_empty());
    }

    #[tokio::test]
    async fn non_deferred_kind_ignores_origin() {
        let h = harness();
        let responder = answer(&h, "set_effect", json!({}));

        h.client
            .call(&SetEffect { name: "Blush".into() }, Some(origin()))
            .await
            .unwrap();
        let _ = responder.await.unwrap();
        assert!(h.client.deferred().is_empty());

        let sent = h.broker.published_matching("/live/req/set_effect");
        let body: Value = sent[0].decode().unwrap();
        assert_eq!(body["name"], "Blush");
    }

    #[tokio::test]
    async fn emit_publishes_event() {
        let h = harness();
        h.client
            .emit("music_select", &json!({"index": 2}))
            .await
            .unwrap();

        let sent = h.broker.published_matching("/live/event/+");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic(), "/live/event/music_select");
    }
}
