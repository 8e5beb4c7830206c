//! Continuous-presence attribution.
//!
//! Time between two samples is credited only to members present in both,
//! so someone who joined mid-interval gets nothing for it.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// One observation of who is present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSample {
    /// Members observed.
    pub members: BTreeSet<String>,
    /// When the observation was made.
    pub at: DateTime<Utc>,
}

impl PresenceSample {
    /// Build a sample.
    pub fn new(members: impl IntoIterator<Item = String>, at: DateTime<Utc>) -> Self {
        Self {
            members: members.into_iter().collect(),
            at,
        }
    }

    /// Credit for the members of `self` still present in `current` at `now`.
    pub fn credit_until(&self, current: &BTreeSet<String>, now: DateTime<Utc>) -> PresenceCredit {
        PresenceCredit {
            members: self.members.intersection(current).cloned().collect(),
            since: self.at,
            until: now,
        }
    }
}

/// Elapsed time attributed to continuously present members.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceCredit {
    /// Members present at both ends of the window.
    pub members: BTreeSet<String>,
    /// Start of the window (previous sample).
    pub since: DateTime<Utc>,
    /// End of the window (current sample or session stop).
    pub until: DateTime<Utc>,
}

impl PresenceCredit {
    /// Length of the window.
    pub fn elapsed(&self) -> TimeDelta {
        self.until - self.since
    }

    /// Length of the window in seconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed().num_milliseconds() as f64 / 1000.0
    }

    /// Whether nobody is credited.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
