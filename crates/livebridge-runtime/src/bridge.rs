//! The assembled bridge.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use livebridge_core::metrics::SESSION_WATCHDOG_STOPS_TOTAL;
use livebridge_core::{DirtyFlag, Envelope, Topics, TransportError};
use livebridge_router::EventRouter;
use livebridge_rpc::{DeferredCallRecord, LiveClient, PendingCallStore, RequestRegistry};
use livebridge_session::{SessionDigest, SessionMonitor};
use livebridge_settings::BridgeSettings;
use livebridge_transport::{MqttConnector, Publisher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::BridgeEvent;
use crate::handlers::{
    AudienceHandler, DeferredOutcomeHandler, DeferredStep, EventSender, FeedHandler, HeatHandler,
    ReplyHandler, SpontaneousHandler, StatusHandler, emit, kinds,
};
use crate::timers::{run_sweeper, run_watchdog};

const EVENT_CAPACITY: usize = 256;

/// Registry, deferred store and session monitor for one controller domain.
///
/// Constructed once per process and shared by `Arc` with the command layer
/// (through [`client`](Self::client)) and with the background tasks.
pub struct LiveBridge {
    topics: Topics,
    registry: Arc<RequestRegistry>,
    deferred: Arc<PendingCallStore>,
    monitor: Arc<SessionMonitor>,
    client: LiveClient,
    events: EventSender,
    dirty: DirtyFlag,
}

impl LiveBridge {
    /// Build the components, all sharing one dirty flag.
    pub fn new(publisher: Arc<dyn Publisher>, settings: &BridgeSettings) -> Self {
        let topics = Topics::new(&settings.rpc.domain);
        let dirty = DirtyFlag::new();

        let registry = Arc::new(
            RequestRegistry::new(Arc::clone(&publisher), topics.clone())
                .with_max_id_attempts(settings.rpc.max_id_attempts)
                .with_dirty_flag(dirty.clone()),
        );
        let deferred = Arc::new(PendingCallStore::new().with_dirty_flag(dirty.clone()));
        let monitor = Arc::new(
            SessionMonitor::new(settings.session.feed_timeout()).with_dirty_flag(dirty.clone()),
        );
        let client = LiveClient::new(
            Arc::clone(&registry),
            Arc::clone(&deferred),
            publisher,
            settings.rpc.default_timeout(),
        )
        .with_deferred_ttl(settings.rpc.deferred_ttl());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            topics,
            registry,
            deferred,
            monitor,
            client,
            events,
            dirty,
        }
    }

    /// Connect to the broker and spawn every background task.
    ///
    /// Returns the bridge and the task handles for
    /// [`ShutdownCoordinator::graceful_shutdown`](crate::ShutdownCoordinator::graceful_shutdown).
    pub fn start(
        settings: &BridgeSettings,
        cancel: CancellationToken,
    ) -> Result<(Arc<Self>, Vec<JoinHandle<()>>), TransportError> {
        let topics = Topics::new(&settings.rpc.domain);
        let connector = MqttConnector::new(&settings.broker, topics)?;
        let bridge = Arc::new(Self::new(connector.publisher(), settings));

        let (inbound_tx, inbound_rx) = mpsc::channel(settings.broker.inbound_capacity);
        let mut handles = bridge.spawn(inbound_rx, settings, cancel.clone());
        handles.push(tokio::spawn(connector.run(inbound_tx, cancel)));

        info!(
            host = %settings.broker.host,
            port = settings.broker.port,
            domain = %bridge.topics.domain(),
            "bridge started"
        );
        Ok((bridge, handles))
    }

    /// Spawn the dispatch loop, the watchdog and the sweeper.
    ///
    /// The dispatch loop consumes `inbound` until it closes or `cancel`
    /// fires, then cancels every pending call.
    pub fn spawn(
        self: &Arc<Self>,
        inbound: mpsc::Receiver<Envelope>,
        settings: &BridgeSettings,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let router = self.router();
        let registry = Arc::clone(&self.registry);
        let dispatch_cancel = cancel.clone();
        let dispatch = tokio::spawn(async move {
            let stopped = router.run(inbound, dispatch_cancel).await;
            debug!(?stopped, "dispatch loop stopped");
            registry.cancel_all();
        });

        let watchdog = tokio::spawn(run_watchdog(
            Arc::clone(self),
            settings.session.watchdog_interval(),
            cancel.clone(),
        ));
        let sweeper = tokio::spawn(run_sweeper(
            Arc::clone(self),
            settings.rpc.sweep_interval(),
            cancel,
        ));
        vec![dispatch, watchdog, sweeper]
    }

    /// Router with the standard handlers for this bridge's domain.
    pub fn router(&self) -> EventRouter {
        let topics = &self.topics;
        let mut router = EventRouter::new();

        router.register_handler(
            topics.any_reply(),
            Arc::new(ReplyHandler {
                registry: Arc::clone(&self.registry),
            }),
        );
        router.register_handler(
            topics.any_status(),
            Arc::new(StatusHandler {
                monitor: Arc::clone(&self.monitor),
                events: self.events.clone(),
            }),
        );
        router.register_handler(
            topics.event(kinds::FEED).as_str(),
            Arc::new(FeedHandler {
                monitor: Arc::clone(&self.monitor),
            }),
        );
        router.register_handler(
            topics.event(kinds::HEATING_END_CHANGED).as_str(),
            Arc::new(HeatHandler {
                monitor: Arc::clone(&self.monitor),
            }),
        );
        router.register_handler(
            topics.event(kinds::ONLINE_AUDIENCES).as_str(),
            Arc::new(AudienceHandler {
                monitor: Arc::clone(&self.monitor),
                events: self.events.clone(),
            }),
        );

        let deferred_kinds = kinds::DEFERRED_FINAL
            .iter()
            .map(|k| (*k, DeferredStep::Final))
            .chain(
                kinds::DEFERRED_STEP
                    .iter()
                    .map(|k| (*k, DeferredStep::Intermediate)),
            );
        for (kind, step) in deferred_kinds {
            router.register_handler(
                topics.event(kind).as_str(),
                Arc::new(DeferredOutcomeHandler {
                    kind,
                    step,
                    deferred: Arc::clone(&self.deferred),
                    events: self.events.clone(),
                }),
            );
        }

        let claimed: HashSet<&'static str> = [
            kinds::FEED,
            kinds::HEATING_END_CHANGED,
            kinds::ONLINE_AUDIENCES,
        ]
        .into_iter()
        .chain(kinds::DEFERRED_FINAL)
        .chain(kinds::DEFERRED_STEP)
        .collect();
        router.register_handler(
            topics.any_event(),
            Arc::new(SpontaneousHandler {
                claimed,
                events: self.events.clone(),
            }),
        );

        router
    }

    /// Stop the session if its feed has gone quiet.
    pub fn check_watchdog(&self) -> Option<SessionDigest> {
        self.check_watchdog_at(Utc::now())
    }

    /// Stop the session if it has timed out as of `now`.
    pub fn check_watchdog_at(&self, now: DateTime<Utc>) -> Option<SessionDigest> {
        let digest = self.monitor.stop_if_timed_out_at(now)?;
        metrics::counter!(SESSION_WATCHDOG_STOPS_TOTAL).increment(1);
        warn!(
            duration = %digest.formatted_duration(),
            "no feed within timeout, stopping session"
        );
        emit(
            &self.events,
            BridgeEvent::SessionStopped {
                digest: digest.clone(),
                forced: true,
            },
        );
        Some(digest)
    }

    /// Drop deferred records whose follow-up never came.
    pub fn sweep_expired(&self) -> Vec<DeferredCallRecord> {
        self.sweep_expired_at(Utc::now())
    }

    /// Drop deferred records expired as of `now`.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Vec<DeferredCallRecord> {
        let expired = self.deferred.sweep_at(now);
        for record in &expired {
            info!(id = %record.id, "deferred call expired without outcome");
            emit(&self.events, BridgeEvent::DeferredExpired(record.clone()));
        }
        expired
    }

    /// Receive bridge events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Typed call entry point for the command layer.
    pub fn client(&self) -> &LiveClient {
        &self.client
    }

    /// Topic names of this bridge's domain.
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// The request registry.
    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    /// The deferred store.
    pub fn deferred(&self) -> &Arc<PendingCallStore> {
        &self.deferred
    }

    /// The session monitor.
    pub fn monitor(&self) -> &Arc<SessionMonitor> {
        &self.monitor
    }

    /// Set after any change to pending, deferred or session state.
    pub fn dirty(&self) -> &DirtyFlag {
        &self.dirty
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
