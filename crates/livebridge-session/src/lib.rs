//! # livebridge-session
//!
//! Tracks whether the remote broadcast session is live.
//!
//! [`SessionMonitor`] moves between Absent and Live on explicit start/stop
//! announcements and on the feed watchdog, and derives two signals while
//! Live: whether a heat interval is active, and which participants stayed
//! present between consecutive audience samples.
//!
//! Every operation has an `_at(now)` form taking the current instant; the
//! plain forms use the wall clock. Heat interval ends arrive as wall-clock
//! timestamps from the remote side, so the monitor runs on `chrono` time.

#![deny(unsafe_code)]

pub mod monitor;
pub mod presence;

pub use monitor::{HeatInterval, SessionAbsent, SessionDigest, SessionMonitor, SessionState};
pub use presence::{PresenceCredit, PresenceSample};
