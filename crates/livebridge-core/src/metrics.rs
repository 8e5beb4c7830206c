//! Metric name constants shared across crates.
//!
//! Recorded through the `metrics` facade. No recorder is installed by the
//! library crates; without one every macro call is a no-op.

/// RPC calls issued (counter, labels: namespace).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// RPC calls that hit their deadline (counter, labels: namespace).
pub const RPC_TIMEOUTS_TOTAL: &str = "rpc_timeouts_total";
/// Replies for unknown or already-resolved ids (counter, labels: namespace).
pub const RPC_STALE_REPLIES_TOTAL: &str = "rpc_stale_replies_total";
/// Correlation id collisions resolved by regeneration (counter).
pub const RPC_ID_COLLISIONS_TOTAL: &str = "rpc_id_collisions_total";
/// Deferred call records resolved by a follow-up event (counter).
pub const DEFERRED_RESOLVED_TOTAL: &str = "deferred_resolved_total";
/// Deferred call records removed by the expiry sweep (counter).
pub const DEFERRED_EXPIRED_TOTAL: &str = "deferred_expired_total";
/// Deferred call records overwritten by a registration for the same id
/// (counter).
pub const DEFERRED_REPLACED_TOTAL: &str = "deferred_replaced_total";
/// Handler failures or panics caught by the router (counter, labels: handler).
pub const ROUTER_HANDLER_FAILURES_TOTAL: &str = "router_handler_failures_total";
/// Envelopes with no matching handler (counter).
pub const ROUTER_UNROUTED_TOTAL: &str = "router_unrouted_total";
/// Broker reconnect attempts (counter).
pub const TRANSPORT_RECONNECTS_TOTAL: &str = "transport_reconnects_total";
/// Publishes that failed and were dropped (counter).
pub const TRANSPORT_PUBLISH_FAILURES_TOTAL: &str = "transport_publish_failures_total";
/// Sessions force-stopped by the feed watchdog (counter).
pub const SESSION_WATCHDOG_STOPS_TOTAL: &str = "session_watchdog_stops_total";
