//! Periodic background checks.
//!
//! Both loops tick on a fixed interval and exit when the token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bridge::LiveBridge;

const MIN_TICK: Duration = Duration::from_millis(1);

fn ticker(period: Duration) -> time::Interval {
    let mut interval = time::interval(period.max(MIN_TICK));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Stop the live session whenever its feed has been quiet too long.
///
/// Recovers from a lost `status/stopped` announcement, e.g. one published
/// while the broker connection was down.
pub async fn run_watchdog(bridge: Arc<LiveBridge>, period: Duration, cancel: CancellationToken) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let _ = bridge.check_watchdog();
            }
            () = cancel.cancelled() => {
                debug!("session watchdog stopped");
                return;
            }
        }
    }
}

/// Periodically expire deferred records whose follow-up never arrived.
pub async fn run_sweeper(bridge: Arc<LiveBridge>, period: Duration, cancel: CancellationToken) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let _ = bridge.sweep_expired();
            }
            () = cancel.cancelled() => {
                debug!("deferred sweeper stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BridgeEvent;
    use assert_matches::assert_matches;
    use livebridge_core::OriginContext;
    use livebridge_settings::BridgeSettings;
    use livebridge_transport::MemoryBroker;
    use serde_json::json;

    fn bridge(settings: &BridgeSettings) -> Arc<LiveBridge> {
        Arc::new(LiveBridge::new(Arc::new(MemoryBroker::new()), settings))
    }

    #[tokio::test]
    async fn watchdog_cancelled() {
        let b = bridge(&BridgeSettings::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_watchdog(b, Duration::from_secs(100), cancel.clone()));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn watchdog_stops_silent_session() {
        let mut settings = BridgeSettings::default();
        settings.session.feed_timeout_secs = 0;
        let b = bridge(&settings);
        let mut events = b.subscribe();
        assert!(b.monitor().start());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_watchdog(
            Arc::clone(&b),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_matches!(event, BridgeEvent::SessionStopped { forced: true, .. });
        assert!(!b.monitor().is_live());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn sweeper_expires_records() {
        let b = bridge(&BridgeSettings::default());
        let mut events = b.subscribe();
        b.deferred().register(
            "A1".into(),
            OriginContext::new(json!({"member": 1})),
            Duration::ZERO,
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_sweeper(
            Arc::clone(&b),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_matches!(event, BridgeEvent::DeferredExpired(record) if record.id.as_str() == "A1");
        assert!(b.deferred().is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
