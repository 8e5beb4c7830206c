//! Outbound notifications for the command and ledger layers.

use chrono::{DateTime, Utc};
use livebridge_core::{CorrelationId, OriginContext};
use livebridge_rpc::DeferredCallRecord;
use livebridge_session::{PresenceCredit, SessionDigest};
use serde_json::Value;

/// Something the layers above the bridge may want to react to.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeEvent {
    /// A session went live.
    SessionStarted {
        /// When it started.
        at: DateTime<Utc>,
    },
    /// The live session ended.
    SessionStopped {
        /// Summary of the session.
        digest: SessionDigest,
        /// `true` when the watchdog stopped it for lack of feed.
        forced: bool,
    },
    /// Time credited to members present in two consecutive samples.
    PresenceCredited(PresenceCredit),
    /// The final outcome of a deferred call arrived.
    DeferredResolved {
        /// Event kind that carried the outcome.
        kind: String,
        /// Correlation id of the originating call.
        id: CorrelationId,
        /// Who asked.
        origin: OriginContext,
        /// The event payload.
        payload: Value,
    },
    /// An intermediate step of a deferred call arrived; the record stays.
    DeferredObserved {
        /// Event kind.
        kind: String,
        /// Correlation id of the originating call.
        id: CorrelationId,
        /// Who asked.
        origin: OriginContext,
        /// The event payload.
        payload: Value,
    },
    /// A deferred call never got its follow-up.
    DeferredExpired(DeferredCallRecord),
    /// Any other event from the controller.
    Spontaneous {
        /// Last topic segment.
        kind: String,
        /// The event payload.
        payload: Value,
    },
}

impl BridgeEvent {
    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::SessionStopped { .. } => "session_stopped",
            Self::PresenceCredited(_) => "presence_credited",
            Self::DeferredResolved { .. } => "deferred_resolved",
            Self::DeferredObserved { .. } => "deferred_observed",
            Self::DeferredExpired(_) => "deferred_expired",
            Self::Spontaneous { .. } => "spontaneous",
        }
    }
}
