//! The Absent/Live state machine.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use livebridge_core::DirtyFlag;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::presence::{PresenceCredit, PresenceSample};

/// Default feed timeout.
pub const DEFAULT_FEED_TIMEOUT: Duration = Duration::from_secs(120);

/// An operation needed a live session and there was none.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no live session")]
pub struct SessionAbsent;

/// A window announced by the remote side, ending at `end`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatInterval {
    /// Exclusive end of the window.
    pub end: DateTime<Utc>,
    /// When the announcement arrived.
    pub recorded_at: DateTime<Utc>,
}

/// State of a live session. Exists only while Live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// When the session started.
    pub created_at: DateTime<Utc>,
    /// Last liveness signal.
    pub last_feed_at: DateTime<Utc>,
    /// Heat windows in arrival order.
    pub heat_intervals: Vec<HeatInterval>,
    /// Latest audience sample, the baseline for the next credit.
    pub presence: Option<PresenceSample>,
    /// Subjects who asked to be notified during this session.
    pub subscribers: BTreeSet<String>,
}

impl SessionState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_feed_at: now,
            heat_intervals: Vec::new(),
            presence: None,
            subscribers: BTreeSet::new(),
        }
    }
}

/// Summary produced when a session stops.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDigest {
    /// Session length in seconds.
    pub duration_seconds: f64,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When it stopped.
    pub stopped_at: DateTime<Utc>,
    /// Number of heat windows announced during the session.
    pub heat_intervals: usize,
    /// Credit for members present at the last sample, up to the stop.
    pub final_presence: Option<PresenceCredit>,
}

impl SessionDigest {
    /// Duration as `HH:MM:SS` (hours are not capped at 24).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn formatted_duration(&self) -> String {
        let total = self.duration_seconds.max(0.0).floor() as u64;
        let (hours, rest) = (total / 3600, total % 3600);
        let (minutes, seconds) = (rest / 60, rest % 60);
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// Liveness monitor for the remote broadcast session.
///
/// Mutated from the dispatch loop and the watchdog task; all state sits
/// behind one mutex.
pub struct SessionMonitor {
    state: Mutex<Option<SessionState>>,
    feed_timeout: TimeDelta,
    dirty: DirtyFlag,
}

impl SessionMonitor {
    /// Create an Absent monitor with the given feed timeout.
    pub fn new(feed_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(None),
            feed_timeout: TimeDelta::from_std(feed_timeout).unwrap_or(TimeDelta::MAX),
            dirty: DirtyFlag::new(),
        }
    }

    /// Share a dirty flag with other components.
    #[must_use]
    pub fn with_dirty_flag(mut self, dirty: DirtyFlag) -> Self {
        self.dirty = dirty;
        self
    }

    /// Whether a session is live.
    pub fn is_live(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Copy of the current session state, if Live.
    pub fn snapshot(&self) -> Option<SessionState> {
        self.state.lock().clone()
    }

    /// Replace the current state with a previously taken snapshot.
    pub fn restore(&self, state: Option<SessionState>) {
        *self.state.lock() = state;
        self.dirty.mark();
    }

    /// Start a session now. See [`start_at`](Self::start_at).
    pub fn start(&self) -> bool {
        self.start_at(Utc::now())
    }

    /// Start a session at `now`. A no-op returning `false` when already Live.
    pub fn start_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if state.is_some() {
            debug!("session already live, ignoring start");
            return false;
        }
        *state = Some(SessionState::new(now));
        drop(state);
        self.dirty.mark();
        info!(started_at = %now, "session started");
        true
    }

    /// Record a liveness signal now.
    pub fn feed(&self) -> bool {
        self.feed_at(Utc::now())
    }

    /// Record a liveness signal at `now`. Returns `false` when Absent.
    pub fn feed_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        let Some(session) = state.as_mut() else {
            return false;
        };
        session.last_feed_at = now;
        drop(state);
        self.dirty.mark();
        true
    }

    /// Whether the live session has gone without a feed for too long, now.
    pub fn is_timed_out(&self) -> bool {
        self.is_timed_out_at(Utc::now())
    }

    /// Live, and strictly more than the feed timeout since the last feed.
    pub fn is_timed_out_at(&self, now: DateTime<Utc>) -> bool {
        self.state
            .lock()
            .as_ref()
            .is_some_and(|s| now - s.last_feed_at > self.feed_timeout)
    }

    /// Stop the session now.
    pub fn stop(&self) -> Option<SessionDigest> {
        self.stop_at(Utc::now())
    }

    /// Stop the session at `now`, returning its digest. `None` when Absent.
    ///
    /// Members of the last presence sample are credited up to `now`.
    pub fn stop_at(&self, now: DateTime<Utc>) -> Option<SessionDigest> {
        let session = self.state.lock().take()?;
        Some(self.finish(session, now))
    }

    /// Stop the session if it has timed out as of `now`.
    ///
    /// The check and the stop happen under one lock, so a feed racing the
    /// watchdog either lands before the check or finds the session gone.
    pub fn stop_if_timed_out_at(&self, now: DateTime<Utc>) -> Option<SessionDigest> {
        let mut state = self.state.lock();
        let timed_out = state
            .as_ref()
            .is_some_and(|s| now - s.last_feed_at > self.feed_timeout);
        if !timed_out {
            return None;
        }
        let session = state.take()?;
        drop(state);
        Some(self.finish(session, now))
    }

    fn finish(&self, session: SessionState, now: DateTime<Utc>) -> SessionDigest {
        self.dirty.mark();
        let final_presence = session
            .presence
            .as_ref()
            .map(|prev| prev.credit_until(&prev.members, now));
        #[allow(clippy::cast_precision_loss)]
        let duration_seconds = (now - session.created_at).num_milliseconds() as f64 / 1000.0;
        let digest = SessionDigest {
            duration_seconds,
            started_at: session.created_at,
            stopped_at: now,
            heat_intervals: session.heat_intervals.len(),
            final_presence,
        };
        info!(duration = %digest.formatted_duration(), "session stopped");
        digest
    }

    /// Record a heat window ending at `end`, announced now.
    pub fn add_heat_interval(&self, end: DateTime<Utc>) -> bool {
        self.add_heat_interval_at(end, Utc::now())
    }

    /// Record a heat window ending at `end`, announced at `now`.
    /// Returns `false` (and records nothing) when Absent.
    pub fn add_heat_interval_at(&self, end: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        let Some(session) = state.as_mut() else {
            debug!(%end, "no live session, ignoring heat interval");
            return false;
        };
        session.heat_intervals.push(HeatInterval {
            end,
            recorded_at: now,
        });
        drop(state);
        self.dirty.mark();
        true
    }

    /// Whether any heat window is active now.
    pub fn is_heating(&self) -> bool {
        self.is_heating_at(Utc::now())
    }

    /// Whether `now` is before the end of any recorded heat window.
    pub fn is_heating_at(&self, now: DateTime<Utc>) -> bool {
        self.state
            .lock()
            .as_ref()
            .is_some_and(|s| s.heat_intervals.iter().any(|h| now < h.end))
    }

    /// Take an audience sample now.
    pub fn sample_presence(
        &self,
        members: impl IntoIterator<Item = String>,
    ) -> Option<PresenceCredit> {
        self.sample_presence_at(members, Utc::now())
    }

    /// Take an audience sample at `now`.
    ///
    /// The first sample of a session only sets the baseline and returns
    /// `None`; each later one returns the credit since the previous sample.
    /// Either way the sample becomes the new baseline. Ignored when Absent.
    pub fn sample_presence_at(
        &self,
        members: impl IntoIterator<Item = String>,
        now: DateTime<Utc>,
    ) -> Option<PresenceCredit> {
        let mut state = self.state.lock();
        let session = state.as_mut()?;
        let current = PresenceSample::new(members, now);
        let credit = session
            .presence
            .as_ref()
            .map(|prev| prev.credit_until(&current.members, now));
        session.presence = Some(current);
        drop(state);
        self.dirty.mark();
        credit
    }

    /// Ask for notifications during the current session.
    ///
    /// Returns `Ok(false)` if `subject` was already subscribed.
    pub fn subscribe_notifications(&self, subject: impl Into<String>) -> Result<bool, SessionAbsent> {
        let mut state = self.state.lock();
        let session = state.as_mut().ok_or(SessionAbsent)?;
        let added = session.subscribers.insert(subject.into());
        drop(state);
        if added {
            self.dirty.mark();
        }
        Ok(added)
    }

    /// Whether `subject` subscribed during the current session.
    pub fn is_subscribed(&self, subject: &str) -> bool {
        self.state
            .lock()
            .as_ref()
            .is_some_and(|s| s.subscribers.contains(subject))
    }
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_TIMEOUT)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
