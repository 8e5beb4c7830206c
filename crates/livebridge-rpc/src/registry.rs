//! Correlated request/reply over the broker.
//!
//! Every [`issue`](RequestRegistry::issue) registers a waiter under
//! `(namespace, id)`, publishes the request with the id injected, then races
//! the waiter against its deadline. [`deliver`](RequestRegistry::deliver) is
//! called from the dispatch loop when a reply arrives and completes the
//! matching waiter, if any.
//!
//! The waiter table is guarded by a single mutex that is never held across
//! an await. Id generation, the collision check and insertion happen under
//! one lock acquisition, so at most one waiter exists per `(namespace, id)`.
//!
//! Cleanup runs through a drop guard owned by the `issue` future: whichever
//! way the call ends (reply, timeout, caller dropping the future) the entry
//! is removed. Each entry carries a generation number and the guard only
//! removes the entry it created, never a later waiter that reused the id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use livebridge_core::metrics::{
    RPC_ID_COLLISIONS_TOTAL, RPC_REQUESTS_TOTAL, RPC_STALE_REPLIES_TOTAL, RPC_TIMEOUTS_TOTAL,
};
use livebridge_core::{
    CorrelationId, DirtyFlag, IdGenerator, RandomIdGenerator, RpcError, Topics,
};
use livebridge_transport::{Publisher, publish_quietly};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Default bound on correlation id regeneration.
pub const DEFAULT_MAX_ID_ATTEMPTS: u32 = 10;

/// Payload field carrying the correlation id.
pub const ID_FIELD: &str = "id";

/// Result of [`RequestRegistry::deliver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// A waiting call received the payload.
    Delivered,
    /// No call was waiting (unknown id, already resolved, or timed out).
    Stale,
}

impl DeliverOutcome {
    /// Whether a waiter was completed.
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered)
    }
}

struct Slot {
    generation: u64,
    tx: oneshot::Sender<Value>,
}

#[derive(Default)]
struct WaiterTable {
    namespaces: HashMap<String, HashMap<CorrelationId, Slot>>,
    next_generation: u64,
}

impl WaiterTable {
    /// Remove `(namespace, id)`. With `generation` set, only an entry of that
    /// generation is removed.
    fn remove(&mut self, namespace: &str, id: &str, generation: Option<u64>) -> Option<Slot> {
        let pending = self.namespaces.get_mut(namespace)?;
        let owned = pending
            .get(id)
            .is_some_and(|slot| generation.is_none_or(|g| slot.generation == g));
        let slot = if owned { pending.remove(id) } else { None };
        if pending.is_empty() {
            let _ = self.namespaces.remove(namespace);
        }
        slot
    }

    fn len(&self) -> usize {
        self.namespaces.values().map(HashMap::len).sum()
    }
}

/// Issues correlated requests and matches their replies.
pub struct RequestRegistry {
    publisher: Arc<dyn Publisher>,
    topics: Topics,
    ids: Arc<dyn IdGenerator>,
    max_id_attempts: u32,
    table: Mutex<WaiterTable>,
    dirty: DirtyFlag,
}

impl RequestRegistry {
    /// Create a registry publishing through `publisher`.
    pub fn new(publisher: Arc<dyn Publisher>, topics: Topics) -> Self {
        Self {
            publisher,
            topics,
            ids: Arc::new(RandomIdGenerator::default()),
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
            table: Mutex::new(WaiterTable::default()),
            dirty: DirtyFlag::new(),
        }
    }

    /// Replace the id generator.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Set the collision retry bound (at least one attempt is always made).
    #[must_use]
    pub fn with_max_id_attempts(mut self, attempts: u32) -> Self {
        self.max_id_attempts = attempts.max(1);
        self
    }

    /// Share a dirty flag with other components.
    #[must_use]
    pub fn with_dirty_flag(mut self, dirty: DirtyFlag) -> Self {
        self.dirty = dirty;
        self
    }

    /// Topic naming in use.
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Issue a request and wait for its reply.
    pub async fn issue(
        &self,
        namespace: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        self.issue_with(namespace, payload, timeout, |_| {}).await
    }

    /// Issue a request, running `on_registered` once the waiter exists and
    /// before the request is published.
    ///
    /// Anything keyed by the correlation id that a reply or follow-up event
    /// might look up must be registered from the hook.
    pub async fn issue_with<F>(
        &self,
        namespace: &str,
        payload: Value,
        timeout: Duration,
        on_registered: F,
    ) -> Result<Value, RpcError>
    where
        F: FnOnce(&CorrelationId) + Send,
    {
        let mut body = request_body(namespace, payload)?;
        let (id, generation, rx) = self.register(namespace)?;
        let _guard = WaiterGuard {
            registry: self,
            namespace,
            id: &id,
            generation,
        };

        let _ = body.insert(ID_FIELD.to_owned(), Value::String(id.to_string()));
        let bytes = serde_json::to_vec(&body).map_err(|e| RpcError::Encode {
            namespace: namespace.to_owned(),
            message: e.to_string(),
        })?;

        on_registered(&id);

        metrics::counter!(RPC_REQUESTS_TOTAL, "namespace" => namespace.to_owned()).increment(1);
        debug!(namespace, %id, "issuing request");
        publish_quietly(
            self.publisher.as_ref(),
            &self.topics.request(namespace),
            Bytes::from(bytes),
        )
        .await;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RpcError::Cancelled {
                namespace: namespace.to_owned(),
                id: id.to_string(),
            }),
            Err(_) => {
                metrics::counter!(RPC_TIMEOUTS_TOTAL, "namespace" => namespace.to_owned())
                    .increment(1);
                debug!(namespace, %id, ?timeout, "request timed out");
                Err(RpcError::Timeout {
                    namespace: namespace.to_owned(),
                    id: id.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Complete the waiter for `(namespace, id)` with `payload`.
    ///
    /// Unknown, already-resolved and timed-out ids are a silent no-op.
    pub fn deliver(&self, namespace: &str, id: &str, payload: Value) -> DeliverOutcome {
        let slot = self.table.lock().remove(namespace, id, None);
        let Some(slot) = slot else {
            metrics::counter!(RPC_STALE_REPLIES_TOTAL, "namespace" => namespace.to_owned())
                .increment(1);
            debug!(namespace, id, "no pending request for reply, dropping");
            return DeliverOutcome::Stale;
        };
        self.dirty.mark();
        if slot.tx.send(payload).is_ok() {
            DeliverOutcome::Delivered
        } else {
            debug!(namespace, id, "caller went away before reply");
            DeliverOutcome::Stale
        }
    }

    /// Number of calls currently waiting, across all namespaces.
    pub fn pending_count(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether `(namespace, id)` is waiting.
    pub fn is_pending(&self, namespace: &str, id: &str) -> bool {
        self.table
            .lock()
            .namespaces
            .get(namespace)
            .is_some_and(|pending| pending.contains_key(id))
    }

    /// Drop every waiter; the affected calls fail with [`RpcError::Cancelled`].
    pub fn cancel_all(&self) {
        let drained = std::mem::take(&mut self.table.lock().namespaces);
        let count: usize = drained.values().map(HashMap::len).sum();
        if count > 0 {
            self.dirty.mark();
            warn!(count, "cancelling pending requests");
        }
    }

    fn register(
        &self,
        namespace: &str,
    ) -> Result<(CorrelationId, u64, oneshot::Receiver<Value>), RpcError> {
        let mut table = self.table.lock();
        let table = &mut *table;
        let generation = table.next_generation;
        table.next_generation += 1;

        let pending = table.namespaces.entry(namespace.to_owned()).or_default();
        for attempt in 1..=self.max_id_attempts {
            let id = self.ids.generate();
            if pending.contains_key(&id) {
                metrics::counter!(RPC_ID_COLLISIONS_TOTAL).increment(1);
                debug!(namespace, %id, attempt, "correlation id collision, regenerating");
                continue;
            }
            let (tx, rx) = oneshot::channel();
            let _ = pending.insert(id.clone(), Slot { generation, tx });
            self.dirty.mark();
            return Ok((id, generation, rx));
        }

        if pending.is_empty() {
            let _ = table.namespaces.remove(namespace);
        }
        warn!(namespace, attempts = self.max_id_attempts, "correlation id space exhausted");
        Err(RpcError::IdSpaceExhausted {
            namespace: namespace.to_owned(),
            attempts: self.max_id_attempts,
        })
    }
}

struct WaiterGuard<'a> {
    registry: &'a RequestRegistry,
    namespace: &'a str,
    id: &'a CorrelationId,
    generation: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let removed = self
            .registry
            .table
            .lock()
            .remove(self.namespace, self.id, Some(self.generation));
        if removed.is_some() {
            self.registry.dirty.mark();
        }
    }
}

fn request_body(namespace: &str, payload: Value) -> Result<Map<String, Value>, RpcError> {
    match payload {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(RpcError::Encode {
            namespace: namespace.to_owned(),
            message: format!("request payload must be an object, got {other}"),
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use assert_matches::assert_matches;
    use livebridge_core::Envelope;
    use livebridge_transport::MemoryBroker;
    use serde_json::json;

    /// Hands out a fixed sequence of ids, then falls back to random ones.
    struct ScriptedIds {
        script: parking_lot::Mutex<VecDeque<&'static str>>,
        fallback: RandomIdGenerator,
    }

    impl ScriptedIds {
        fn new(ids: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                script: parking_lot::Mutex::new(ids.iter().copied().collect()),
                fallback: RandomIdGenerator::default(),
            })
        }
    }

    impl IdGenerator for ScriptedIds {
        fn generate(&self) -> CorrelationId {
            match self.script.lock().pop_front() {
                Some(id) => CorrelationId::from(id),
                None => self.fallback.generate(),
            }
        }
    }

    struct ConstantId;

    impl IdGenerator for ConstantId {
        fn generate(&self) -> CorrelationId {
            CorrelationId::from("SAME")
        }
    }

    fn registry(broker: &MemoryBroker) -> Arc<RequestRegistry> {
        Arc::new(RequestRegistry::new(
            Arc::new(broker.clone()),
            Topics::default(),
        ))
    }

    fn request_id(envelope: &Envelope) -> String {
        envelope.str_field(ID_FIELD).unwrap()
    }

    async fn wait_for_publishes(broker: &MemoryBroker, count: usize) -> Vec<Envelope> {
        loop {
            let published = broker.published();
            if published.len() >= count {
                return published;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);

        let started = tokio::time::Instant::now();
        let result = reg.issue("ping", json!({}), Duration::from_secs(1)).await;
        let elapsed = started.elapsed();

        assert_matches!(
            result,
            Err(RpcError::Timeout { namespace, timeout_ms: 1000, .. }) if namespace == "ping"
        );
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1050));
        assert_eq!(reg.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_id_is_gone_and_late_reply_is_stale() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);

        let result = reg.issue("ping", json!({}), Duration::from_secs(1)).await;
        assert!(result.is_err());

        let id = request_id(&broker.published()[0]);
        assert!(!reg.is_pending("ping", &id));
        assert_eq!(reg.deliver("ping", &id, json!({})), DeliverOutcome::Stale);
    }

    #[tokio::test]
    async fn request_carries_payload_and_id() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);

        let task = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                reg.issue("echo", json!({"text": "hi"}), Duration::from_secs(5))
                    .await
            })
        };

        let published = wait_for_publishes(&broker, 1).await;
        let request = &published[0];
        assert_eq!(request.topic(), "/live/req/echo");
        let body: Value = request.decode().unwrap();
        assert_eq!(body["text"], "hi");
        let id = request_id(request);
        assert_eq!(id.len(), livebridge_core::ids::CORRELATION_ID_LEN);
        assert!(reg.is_pending("echo", &id));

        let outcome = reg.deliver("echo", &id, json!({"id": id, "text": "hi"}));
        assert!(outcome.is_delivered());

        let reply = task.await.unwrap().unwrap();
        assert_eq!(reply["text"], "hi");
        assert_eq!(reg.pending_count(), 0);
    }

    #[tokio::test]
    async fn null_payload_becomes_empty_object() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);

        let task = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.issue("playlist", Value::Null, Duration::from_secs(5)).await })
        };
        let published = wait_for_publishes(&broker, 1).await;
        let body: Value = published[0].decode().unwrap();
        let id = request_id(&published[0]);
        assert_eq!(body.as_object().unwrap().len(), 1);

        let _ = reg.deliver("playlist", &id, json!({}));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn non_object_payload_is_rejected() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);

        let result = reg.issue("echo", json!([1, 2]), Duration::from_secs(1)).await;
        assert_matches!(result, Err(RpcError::Encode { .. }));
        assert!(broker.published().is_empty());
        assert_eq!(reg.pending_count(), 0);
    }

    async fn colliding_calls_get_their_own_replies(reverse: bool) {
        let broker = MemoryBroker::new();
        let reg = Arc::new(
            RequestRegistry::new(Arc::new(broker.clone()), Topics::default())
                .with_id_generator(ScriptedIds::new(&["AAAA", "AAAA", "BBBB"])),
        );

        let first = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                reg.issue("echo", json!({"n": 1}), Duration::from_secs(5)).await
            })
        };
        let _ = wait_for_publishes(&broker, 1).await;
        let second = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                reg.issue("echo", json!({"n": 2}), Duration::from_secs(5)).await
            })
        };
        let published = wait_for_publishes(&broker, 2).await;

        let ids: Vec<String> = published.iter().map(request_id).collect();
        assert_eq!(ids, ["AAAA", "BBBB"]);
        assert_eq!(reg.pending_count(), 2);

        let mut replies = vec![("AAAA", json!({"n": 1})), ("BBBB", json!({"n": 2}))];
        if reverse {
            replies.reverse();
        }
        for (id, payload) in replies {
            assert!(reg.deliver("echo", id, payload).is_delivered());
        }

        assert_eq!(first.await.unwrap().unwrap()["n"], 1);
        assert_eq!(second.await.unwrap().unwrap()["n"], 2);
        assert_eq!(reg.pending_count(), 0);
    }

    #[tokio::test]
    async fn colliding_ids_regenerate_replies_in_order() {
        colliding_calls_get_their_own_replies(false).await;
    }

    #[tokio::test]
    async fn colliding_ids_regenerate_replies_reversed() {
        colliding_calls_get_their_own_replies(true).await;
    }

    #[tokio::test]
    async fn same_id_in_other_namespace_is_no_collision() {
        let broker = MemoryBroker::new();
        let reg = Arc::new(
            RequestRegistry::new(Arc::new(broker.clone()), Topics::default())
                .with_id_generator(Arc::new(ConstantId)),
        );

        let a = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.issue("a", json!({}), Duration::from_secs(5)).await })
        };
        let b = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.issue("b", json!({}), Duration::from_secs(5)).await })
        };
        let _ = wait_for_publishes(&broker, 2).await;

        assert!(reg.is_pending("a", "SAME"));
        assert!(reg.is_pending("b", "SAME"));
        assert!(reg.deliver("b", "SAME", json!({"from": "b"})).is_delivered());
        assert!(reg.deliver("a", "SAME", json!({"from": "a"})).is_delivered());
        assert_eq!(a.await.unwrap().unwrap()["from"], "a");
        assert_eq!(b.await.unwrap().unwrap()["from"], "b");
    }

    #[tokio::test]
    async fn id_space_exhaustion_fails_fast() {
        let broker = MemoryBroker::new();
        let reg = Arc::new(
            RequestRegistry::new(Arc::new(broker.clone()), Topics::default())
                .with_id_generator(Arc::new(ConstantId)),
        );

        let holder = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.issue("echo", json!({}), Duration::from_secs(5)).await })
        };
        let _ = wait_for_publishes(&broker, 1).await;

        let result = reg.issue("echo", json!({}), Duration::from_secs(5)).await;
        assert_matches!(
            result,
            Err(RpcError::IdSpaceExhausted { attempts: DEFAULT_MAX_ID_ATTEMPTS, .. })
        );
        assert_eq!(broker.published().len(), 1);
        assert_eq!(reg.pending_count(), 1);

        let _ = reg.deliver("echo", "SAME", json!({}));
        assert!(holder.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn deliver_unknown_or_twice_is_noop() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);
        assert_eq!(reg.deliver("echo", "NOPE", json!({})), DeliverOutcome::Stale);

        let task = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.issue("echo", json!({}), Duration::from_secs(5)).await })
        };
        let published = wait_for_publishes(&broker, 1).await;
        let id = request_id(&published[0]);

        assert_eq!(reg.deliver("echo", &id, json!({"n": 1})), DeliverOutcome::Delivered);
        assert_eq!(reg.deliver("echo", &id, json!({"n": 2})), DeliverOutcome::Stale);
        assert_eq!(task.await.unwrap().unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn wrong_namespace_does_not_match() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);

        let task = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.issue("echo", json!({}), Duration::from_secs(5)).await })
        };
        let published = wait_for_publishes(&broker, 1).await;
        let id = request_id(&published[0]);

        assert_eq!(reg.deliver("ping", &id, json!({})), DeliverOutcome::Stale);
        assert!(reg.is_pending("echo", &id));
        let _ = reg.deliver("echo", &id, json!({}));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn dropped_caller_cleans_up() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);

        let task = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.issue("echo", json!({}), Duration::from_secs(60)).await })
        };
        let _ = wait_for_publishes(&broker, 1).await;
        assert_eq!(reg.pending_count(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(reg.pending_count(), 0);
    }

    #[tokio::test]
    async fn stale_guard_does_not_remove_reused_id() {
        let broker = MemoryBroker::new();
        let reg = Arc::new(
            RequestRegistry::new(Arc::new(broker.clone()), Topics::default())
                .with_id_generator(ScriptedIds::new(&["XXXX", "XXXX"])),
        );

        let first = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.issue("echo", json!({}), Duration::from_secs(5)).await })
        };
        let _ = wait_for_publishes(&broker, 1).await;

        // Reply to the first call, then register a second call under the same
        // id before the first task gets to run its cleanup.
        assert!(reg.deliver("echo", "XXXX", json!({"n": 1})).is_delivered());
        let second = reg.issue("echo", json!({}), Duration::from_secs(5));
        tokio::pin!(second);
        assert!(futures::poll!(&mut second).is_pending());
        assert!(reg.is_pending("echo", "XXXX"));

        assert_eq!(first.await.unwrap().unwrap()["n"], 1);
        assert!(reg.is_pending("echo", "XXXX"));

        assert!(reg.deliver("echo", "XXXX", json!({"n": 2})).is_delivered());
        assert_eq!(second.await.unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn hook_runs_after_registration_before_publish() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);

        let seen = Arc::new(parking_lot::Mutex::new(None));
        let task = {
            let reg = Arc::clone(&reg);
            let broker = broker.clone();
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let reg2 = Arc::clone(&reg);
                reg.issue_with("screen_record", json!({}), Duration::from_secs(5), move |id| {
                    *seen.lock() = Some((
                        id.to_string(),
                        reg2.is_pending("screen_record", id),
                        broker.published().len(),
                    ));
                })
                .await
            })
        };
        let published = wait_for_publishes(&broker, 1).await;
        let id = request_id(&published[0]);

        let (hook_id, was_pending, published_before) = seen.lock().clone().unwrap();
        assert_eq!(hook_id, id);
        assert!(was_pending);
        assert_eq!(published_before, 0);

        let _ = reg.deliver("screen_record", &id, json!({}));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancel_all_fails_waiters() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);

        let task = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.issue("echo", json!({}), Duration::from_secs(60)).await })
        };
        let _ = wait_for_publishes(&broker, 1).await;

        reg.cancel_all();
        assert_eq!(reg.pending_count(), 0);
        assert_matches!(task.await.unwrap(), Err(RpcError::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_is_contained_and_times_out() {
        let broker = MemoryBroker::new();
        broker.set_failing(true);
        let reg = registry(&broker);

        let result = reg.issue("ping", json!({}), Duration::from_millis(200)).await;
        assert_matches!(result, Err(RpcError::Timeout { .. }));
        assert_eq!(reg.pending_count(), 0);
    }

    #[tokio::test]
    async fn registry_marks_dirty_on_mutation() {
        let broker = MemoryBroker::new();
        let dirty = DirtyFlag::new();
        let reg = Arc::new(
            RequestRegistry::new(Arc::new(broker.clone()), Topics::default())
                .with_dirty_flag(dirty.clone()),
        );

        let task = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.issue("echo", json!({}), Duration::from_secs(5)).await })
        };
        let published = wait_for_publishes(&broker, 1).await;
        assert!(dirty.take());

        let _ = reg.deliver("echo", &request_id(&published[0]), json!({}));
        assert!(dirty.take());
        assert!(task.await.unwrap().is_ok());
    }
}
