//! Deferred call records.
//!
//! Some calls acknowledge immediately while their real outcome arrives later
//! as an event tagged with the call's correlation id. The store remembers
//! who asked so the event handler can report back, and forgets records whose
//! follow-up never came.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use livebridge_core::metrics::{
    DEFERRED_EXPIRED_TOTAL, DEFERRED_REPLACED_TOTAL, DEFERRED_RESOLVED_TOTAL,
};
use livebridge_core::{CorrelationId, DirtyFlag, OriginContext};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Bookkeeping for one call whose outcome arrives out of band.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredCallRecord {
    /// Correlation id of the originating call.
    pub id: CorrelationId,
    /// Who asked, as supplied by the command layer.
    pub origin: OriginContext,
    /// When the record was registered.
    pub created_at: DateTime<Utc>,
    /// After this instant the record is eligible for sweeping.
    pub expires_at: DateTime<Utc>,
}

impl DeferredCallRecord {
    /// Whether the record has expired at `now` (strictly after `expires_at`).
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Deferred records keyed by correlation id.
#[derive(Default)]
pub struct PendingCallStore {
    records: Mutex<HashMap<CorrelationId, DeferredCallRecord>>,
    dirty: DirtyFlag,
}

impl PendingCallStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a dirty flag with other components.
    #[must_use]
    pub fn with_dirty_flag(mut self, dirty: DirtyFlag) -> Self {
        self.dirty = dirty;
        self
    }

    /// Record `origin` for `id`, expiring `ttl` from now.
    pub fn register(&self, id: CorrelationId, origin: OriginContext, ttl: Duration) {
        self.register_at(id, origin, ttl, Utc::now());
    }

    /// Record `origin` for `id`, expiring `ttl` after `now`.
    ///
    /// Registering an id that is already present replaces the old record.
    /// Ids are unique only per namespace, so a replacement is logged at
    /// `warn` and counted: the old origin will never hear its outcome.
    pub fn register_at(
        &self,
        id: CorrelationId,
        origin: OriginContext,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let record = DeferredCallRecord {
            id: id.clone(),
            origin,
            created_at: now,
            expires_at,
        };
        let replaced = self.records.lock().insert(id.clone(), record);
        if let Some(old) = replaced {
            metrics::counter!(DEFERRED_REPLACED_TOTAL).increment(1);
            warn!(
                %id,
                old_created_at = %old.created_at,
                "deferred record replaced before its outcome arrived"
            );
        }
        self.dirty.mark();
    }

    /// Pop the origin for `id`. Returns `None` on every call after the first.
    pub fn resolve(&self, id: &str) -> Option<OriginContext> {
        let record = self.records.lock().remove(id)?;
        self.dirty.mark();
        metrics::counter!(DEFERRED_RESOLVED_TOTAL).increment(1);
        Some(record.origin)
    }

    /// The origin for `id`, leaving the record in place.
    ///
    /// For follow-ups that arrive in several steps before the final outcome.
    pub fn peek(&self, id: &str) -> Option<OriginContext> {
        self.records.lock().get(id).map(|r| r.origin.clone())
    }

    /// Drop the record for `id` without reporting it, for calls whose direct
    /// reply already failed.
    pub fn discard(&self, id: &str) -> bool {
        let removed = self.records.lock().remove(id).is_some();
        if removed {
            self.dirty.mark();
        }
        removed
    }

    /// Remove and return every record expired as of now.
    pub fn sweep(&self) -> Vec<DeferredCallRecord> {
        self.sweep_at(Utc::now())
    }

    /// Remove and return every record with `expires_at < now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<DeferredCallRecord> {
        let expired: Vec<DeferredCallRecord> = {
            let mut records = self.records.lock();
            let ids: Vec<CorrelationId> = records
                .values()
                .filter(|r| r.is_expired_at(now))
                .map(|r| r.id.clone())
                .collect();
            ids.iter().filter_map(|id| records.remove(id)).collect()
        };
        if !expired.is_empty() {
            self.dirty.mark();
            metrics::counter!(DEFERRED_EXPIRED_TOTAL).increment(expired.len() as u64);
            debug!(count = expired.len(), "swept expired deferred records");
        }
        expired
    }

    /// Copy of every record, for the snapshot collaborator.
    pub fn snapshot(&self) -> Vec<DeferredCallRecord> {
        self.records.lock().values().cloned().collect()
    }

    /// Whether `id` has a record.
    pub fn contains(&self, id: &str) -> bool {
        self.records.lock().contains_key(id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
