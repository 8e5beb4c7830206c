//! Standard topic handlers.
//!
//! Each handler owns the component it drives plus the bridge's event
//! sender. Payload problems are returned as [`HandlerError`]s so the router
//! logs them; unknown or already-settled ids are dropped quietly.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livebridge_core::{CorrelationId, Envelope, HandlerError, ProtocolError};
use livebridge_router::EventHandler;
use livebridge_rpc::registry::ID_FIELD;
use livebridge_rpc::{PendingCallStore, RequestRegistry};
use livebridge_session::SessionMonitor;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::events::BridgeEvent;

/// Event kinds with dedicated handlers.
pub mod kinds {
    /// Liveness signal.
    pub const FEED: &str = "feed";
    /// New heat window end, `{value: <epoch seconds>}`.
    pub const HEATING_END_CHANGED: &str = "heating_end_timestamp_changed";
    /// Audience sample, `{openids: [...]}`.
    pub const ONLINE_AUDIENCES: &str = "online_audiences";
    /// Whac-a-mole round lost.
    pub const WHAC_A_MOLE_SLOT_FAILED: &str = "whac_a_mole_slot_failed";
    /// Whac-a-mole round won.
    pub const WHAC_A_MOLE_SLOT_SUCCEED: &str = "whac_a_mole_slot_succeed";
    /// Recording finished.
    pub const SCREEN_RECORD_DONE: &str = "screen_record_done";
    /// Candidate songs for an `add_music` call, answered later by the viewer.
    pub const MUSIC_CANDIDATE_LIST: &str = "music_candidate_list";

    /// Kinds that carry the final outcome of a deferred call.
    pub const DEFERRED_FINAL: [&str; 3] = [
        WHAC_A_MOLE_SLOT_FAILED,
        WHAC_A_MOLE_SLOT_SUCCEED,
        SCREEN_RECORD_DONE,
    ];

    /// Kinds that carry an intermediate step of a deferred call.
    pub const DEFERRED_STEP: [&str; 1] = [MUSIC_CANDIDATE_LIST];
}

/// Status announcement tails.
pub mod status {
    /// Session went live.
    pub const STARTED: &str = "started";
    /// Session ended.
    pub const STOPPED: &str = "stopped";
}

pub(crate) type EventSender = broadcast::Sender<BridgeEvent>;

pub(crate) fn emit(events: &EventSender, event: BridgeEvent) {
    let label = event.label();
    if events.send(event).is_err() {
        debug!(event = label, "no subscribers for bridge event");
    }
}

// ── Replies ─────────────────────────────────────────────────────────────────

/// `<domain>/resp/+`: completes the waiting call.
pub struct ReplyHandler {
    pub(crate) registry: Arc<RequestRegistry>,
}

#[async_trait]
impl EventHandler for ReplyHandler {
    fn name(&self) -> &str {
        "reply"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let id = envelope.str_field(ID_FIELD)?;
        let payload = envelope.json_value()?;
        let _ = self.registry.deliver(envelope.topic_tail(), &id, payload);
        Ok(())
    }
}

// ── Session ─────────────────────────────────────────────────────────────────

/// `<domain>/status/+`: explicit start and stop announcements.
pub struct StatusHandler {
    pub(crate) monitor: Arc<SessionMonitor>,
    pub(crate) events: EventSender,
}

#[async_trait]
impl EventHandler for StatusHandler {
    fn name(&self) -> &str {
        "status"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let now = Utc::now();
        match envelope.topic_tail() {
            status::STARTED => {
                if self.monitor.start_at(now) {
                    emit(&self.events, BridgeEvent::SessionStarted { at: now });
                }
            }
            status::STOPPED => {
                if let Some(digest) = self.monitor.stop_at(now) {
                    emit(
                        &self.events,
                        BridgeEvent::SessionStopped {
                            digest,
                            forced: false,
                        },
                    );
                }
            }
            other => debug!(status = other, "ignoring unknown status"),
        }
        Ok(())
    }
}

/// `<domain>/event/feed`.
pub struct FeedHandler {
    pub(crate) monitor: Arc<SessionMonitor>,
}

#[async_trait]
impl EventHandler for FeedHandler {
    fn name(&self) -> &str {
        "feed"
    }

    async fn handle(&self, _envelope: &Envelope) -> Result<(), HandlerError> {
        if !self.monitor.feed() {
            debug!("feed without live session");
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct HeatPayload {
    value: f64,
}

/// Epoch seconds, possibly fractional, as a UTC instant.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn heat_end(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let secs = value.floor();
    let nanos = ((value - secs) * 1e9).round().min(999_999_999.0);
    DateTime::from_timestamp(secs as i64, nanos as u32)
}

/// `<domain>/event/heating_end_timestamp_changed`.
pub struct HeatHandler {
    pub(crate) monitor: Arc<SessionMonitor>,
}

#[async_trait]
impl EventHandler for HeatHandler {
    fn name(&self) -> &str {
        "heat"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let HeatPayload { value } = envelope.decode()?;
        let end = heat_end(value).ok_or_else(|| {
            ProtocolError::MalformedPayload {
                topic: envelope.topic().to_owned(),
                message: format!("timestamp {value} out of range"),
            }
        })?;
        let _ = self.monitor.add_heat_interval(end);
        Ok(())
    }
}

#[derive(Deserialize)]
struct AudiencePayload {
    #[serde(default)]
    openids: Vec<String>,
}

/// `<domain>/event/online_audiences`.
pub struct AudienceHandler {
    pub(crate) monitor: Arc<SessionMonitor>,
    pub(crate) events: EventSender,
}

#[async_trait]
impl EventHandler for AudienceHandler {
    fn name(&self) -> &str {
        "audience"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        if !self.monitor.is_live() {
            return Ok(());
        }
        let AudiencePayload { openids } = envelope.decode()?;
        if let Some(credit) = self.monitor.sample_presence(openids) {
            emit(&self.events, BridgeEvent::PresenceCredited(credit));
        }
        Ok(())
    }
}

// ── Deferred outcomes ───────────────────────────────────────────────────────

/// Whether an outcome event settles its deferred record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredStep {
    /// Final outcome: the record is popped.
    Final,
    /// Intermediate step: the record stays for the next one.
    Intermediate,
}

/// `<domain>/event/<kind>` for kinds tagged with a deferred call's id.
pub struct DeferredOutcomeHandler {
    pub(crate) kind: &'static str,
    pub(crate) step: DeferredStep,
    pub(crate) deferred: Arc<PendingCallStore>,
    pub(crate) events: EventSender,
}

#[async_trait]
impl EventHandler for DeferredOutcomeHandler {
    fn name(&self) -> &str {
        self.kind
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let id = CorrelationId::from(envelope.str_field(ID_FIELD)?);
        let payload = envelope.json_value()?;
        let origin = match self.step {
            DeferredStep::Final => self.deferred.resolve(&id),
            DeferredStep::Intermediate => self.deferred.peek(&id),
        };
        let Some(origin) = origin else {
            debug!(kind = self.kind, %id, "no deferred record, dropping outcome");
            return Ok(());
        };

        let kind = self.kind.to_owned();
        let event = match self.step {
            DeferredStep::Final => BridgeEvent::DeferredResolved {
                kind,
                id,
                origin,
                payload,
            },
            DeferredStep::Intermediate => BridgeEvent::DeferredObserved {
                kind,
                id,
                origin,
                payload,
            },
        };
        emit(&self.events, event);
        Ok(())
    }
}

// ── Everything else ─────────────────────────────────────────────────────────

/// `<domain>/event/+` minus the kinds handled above.
pub struct SpontaneousHandler {
    pub(crate) claimed: HashSet<&'static str>,
    pub(crate) events: EventSender,
}

#[async_trait]
impl EventHandler for SpontaneousHandler {
    fn name(&self) -> &str {
        "spontaneous"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let kind = envelope.topic_tail();
        if self.claimed.contains(kind) {
            return Ok(());
        }
        let payload = envelope.json_value()?;
        emit(
            &self.events,
            BridgeEvent::Spontaneous {
                kind: kind.to_owned(),
                payload,
            },
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
