//! Typed call kinds.
//!
//! Each kind is a serializable request struct implementing [`RpcCall`],
//! which fixes its wire name, its response type and its options. Responses
//! may carry a business-level rejection inside an otherwise successful
//! reply; [`RpcResponse::rejection`] extracts it.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Per-kind call options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Reply deadline; `None` uses the client default.
    pub timeout: Option<Duration>,
    /// Whether the call's origin is kept in the deferred store, waiting for
    /// the follow-up event.
    pub deferred: bool,
    /// Lifetime of the deferred record; `None` uses the client default.
    pub deferred_ttl: Option<Duration>,
}

impl CallOptions {
    /// Options with the client defaults.
    pub const fn new() -> Self {
        Self {
            timeout: None,
            deferred: false,
            deferred_ttl: None,
        }
    }

    /// Override the reply deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark the call as deferred with the client's record ttl.
    #[must_use]
    pub const fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Mark the call as deferred with its own record ttl.
    #[must_use]
    pub const fn deferred_for(mut self, ttl: Duration) -> Self {
        self.deferred = true;
        self.deferred_ttl = Some(ttl);
        self
    }
}

/// Decoded reply of a call kind.
pub trait RpcResponse: DeserializeOwned + Send {
    /// The remote side's reason for rejecting the call, if it did.
    fn rejection(&self) -> Option<String> {
        None
    }
}

/// A call kind.
pub trait RpcCall: Serialize + Send + Sync {
    /// Wire name; the request goes to `<domain>/req/<NAME>`.
    const NAME: &'static str;
    /// Reply shape.
    type Response: RpcResponse;

    /// Timeout and deferral for this kind.
    fn options() -> CallOptions {
        CallOptions::new()
    }
}

const ONE_MINUTE: Duration = Duration::from_secs(60);

// ── Responses ───────────────────────────────────────────────────────────────

/// `{succeed, reason}` acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Ack {
    /// Whether the controller accepted the call.
    pub succeed: bool,
    /// Rejection reason.
    #[serde(default)]
    pub reason: String,
}

impl RpcResponse for Ack {
    fn rejection(&self) -> Option<String> {
        (!self.succeed).then(|| self.reason.clone())
    }
}

/// A reply with no meaningful fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Empty {}

impl RpcResponse for Empty {}

/// One queued song.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct QueueItem {
    /// Display name of the requester.
    pub uname: String,
    /// Song title.
    pub music_name: String,
}

/// Current music queue.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PlaylistResponse {
    /// Songs in play order.
    pub queue: Vec<QueueItem>,
}

impl RpcResponse for PlaylistResponse {}

/// Slot assignment in the whac-a-mole game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct WhacAMoleResponse {
    /// Assigned slot; negative values are rejections.
    pub position: i64,
}

/// Position reported when the viewer has not joined the live stream.
pub const POSITION_NOT_WATCHING: i64 = -2;

impl RpcResponse for WhacAMoleResponse {
    fn rejection(&self) -> Option<String> {
        match self.position {
            POSITION_NOT_WATCHING => Some("watch the live stream first".to_owned()),
            p if p < 0 => Some("all slots are taken".to_owned()),
            _ => None,
        }
    }
}

/// Estimated wait until a viewer's requested song plays.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct MusicWaitTime {
    /// Whether the viewer has a song queued.
    pub in_queue: bool,
    /// Lower bound in seconds.
    #[serde(default)]
    pub min_duration: f64,
    /// Upper bound in seconds.
    #[serde(default)]
    pub max_duration: f64,
}

impl RpcResponse for MusicWaitTime {}

/// Result of redeeming a code.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RedeemResponse {
    /// Whether the code was accepted.
    pub succeed: bool,
    /// Rejection reason.
    #[serde(default)]
    pub reason: String,
    /// Units granted.
    #[serde(default)]
    pub count: i64,
}

impl RpcResponse for RedeemResponse {
    fn rejection(&self) -> Option<String> {
        (!self.succeed).then(|| self.reason.clone())
    }
}

/// Location of a captured frame.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ScreenshotResponse {
    /// Image URL.
    pub url: String,
}

impl RpcResponse for ScreenshotResponse {}

// ── Calls ───────────────────────────────────────────────────────────────────

/// Queue a song; the selection outcome arrives later.
#[derive(Clone, Debug, Serialize)]
pub struct AddMusic {
    /// Search text.
    pub query: String,
    /// Viewer's platform id.
    pub openid: String,
    /// Viewer's display name.
    pub uname: String,
    /// Viewer's avatar URL.
    pub avatar: String,
}

impl RpcCall for AddMusic {
    const NAME: &'static str = "add_music";
    type Response = Ack;

    fn options() -> CallOptions {
        CallOptions::new()
            .with_timeout(ONE_MINUTE)
            .deferred_for(ONE_MINUTE)
    }
}

/// Fetch the music queue.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Playlist;

impl RpcCall for Playlist {
    const NAME: &'static str = "playlist";
    type Response = PlaylistResponse;
}

/// Start a screen recording; completion arrives as `screen_record_done`.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct ScreenRecord;

impl RpcCall for ScreenRecord {
    const NAME: &'static str = "screen_record";
    type Response = Ack;

    fn options() -> CallOptions {
        CallOptions::new().deferred()
    }
}

/// Join the whac-a-mole game; the round result arrives as a slot event.
#[derive(Clone, Debug, Serialize)]
pub struct WhacAMole {
    /// Viewer's platform id.
    pub openid: String,
    /// Viewer's avatar URL.
    pub avatar: String,
}

impl RpcCall for WhacAMole {
    const NAME: &'static str = "whac_a_mole";
    type Response = WhacAMoleResponse;

    fn options() -> CallOptions {
        CallOptions::new().deferred()
    }
}

/// Ask how long until the viewer's song plays.
#[derive(Clone, Debug, Serialize)]
pub struct FetchMusicWaitTime {
    /// Viewer's platform id.
    pub openid: String,
}

impl RpcCall for FetchMusicWaitTime {
    const NAME: &'static str = "fetch_music_wait_time";
    type Response = MusicWaitTime;
}

/// Switch the viewer's requests to instrumental-only.
#[derive(Clone, Debug, Serialize)]
pub struct UserSwitchInstrOnly {
    /// Viewer's platform id.
    pub openid: String,
}

impl RpcCall for UserSwitchInstrOnly {
    const NAME: &'static str = "user_switch_instr_only";
    type Response = Ack;

    fn options() -> CallOptions {
        CallOptions::new().deferred()
    }
}

/// Redeem a code for the viewer.
#[derive(Clone, Debug, Serialize)]
pub struct RedeemCdkey {
    /// Viewer's platform id.
    pub openid: String,
    /// The code.
    pub cdkey: String,
}

impl RpcCall for RedeemCdkey {
    const NAME: &'static str = "redeem_cdkey";
    type Response = RedeemResponse;

    fn options() -> CallOptions {
        CallOptions::new().deferred()
    }
}

/// Capture the current frame.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Screenshoot;

impl RpcCall for Screenshoot {
    const NAME: &'static str = "screenshoot";
    type Response = ScreenshotResponse;
}

/// Trigger an on-stream effect.
#[derive(Clone, Debug, Serialize)]
pub struct SetEffect {
    /// Effect name.
    pub name: String,
}

impl RpcCall for SetEffect {
    const NAME: &'static str = "set_effect";
    type Response = Empty;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ack_rejection_carries_reason() {
        let ack: Ack = serde_json::from_value(json!({"succeed": false, "reason": "queue full"})).unwrap();
        assert_eq!(ack.rejection().as_deref(), Some("queue full"));
        let ok: Ack = serde_json::from_value(json!({"id": "X", "succeed": true})).unwrap();
        assert_eq!(ok.rejection(), None);
    }

    #[test]
    fn whac_a_mole_positions() {
        let reject = |p: i64| WhacAMoleResponse { position: p }.rejection();
        assert_eq!(reject(3), None);
        assert_eq!(reject(0), None);
        assert_eq!(reject(-2).as_deref(), Some("watch the live stream first"));
        assert_eq!(reject(-1).as_deref(), Some("all slots are taken"));
        assert_eq!(reject(-7).as_deref(), Some("all slots are taken"));
    }

    #[test]
    fn wait_time_defaults_durations() {
        let w: MusicWaitTime = serde_json::from_value(json!({"in_queue": false})).unwrap();
        assert!(!w.in_queue);
        assert!(w.min_duration.abs() < f64::EPSILON);
    }

    #[test]
    fn playlist_decodes_queue() {
        let p: PlaylistResponse = serde_json::from_value(json!({
            "id": "X",
            "queue": [{"uname": "alice", "music_name": "song"}]
        }))
        .unwrap();
        assert_eq!(p.queue[0].music_name, "song");
    }

    #[test]
    fn unit_calls_encode_as_null() {
        assert_eq!(serde_json::to_value(Playlist).unwrap(), serde_json::Value::Null);
        assert_eq!(
            serde_json::to_value(SetEffect { name: "Blush".into() }).unwrap(),
            json!({"name": "Blush"})
        );
    }

    #[test]
    fn options_per_kind() {
        assert_eq!(AddMusic::options().timeout, Some(ONE_MINUTE));
        assert_eq!(AddMusic::options().deferred_ttl, Some(ONE_MINUTE));
        assert_eq!(WhacAMole::options().timeout, None);
        assert!(WhacAMole::options().deferred);
        assert_eq!(WhacAMole::options().deferred_ttl, None);
        assert!(!FetchMusicWaitTime::options().deferred);
        assert_eq!(Playlist::options(), CallOptions::new());
        assert_eq!(Screenshoot::NAME, "screenshoot");
    }
}
