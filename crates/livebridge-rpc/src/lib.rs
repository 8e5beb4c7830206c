//! # livebridge-rpc
//!
//! Asynchronous calls to the remote broadcast controller:
//!
//! - [`RequestRegistry`]: correlation ids, waiters, timeouts, idempotent delivery
//! - [`PendingCallStore`]: origins of calls whose outcome arrives as a later event
//! - [`calls`]: the typed call kinds and their response shapes
//! - [`LiveClient`]: issues typed calls and keeps the deferred store in step

#![deny(unsafe_code)]

pub mod calls;
pub mod client;
pub mod deferred;
pub mod registry;

pub use calls::{CallOptions, RpcCall, RpcResponse};
pub use client::{DEFAULT_DEFERRED_TTL, LiveClient};
pub use deferred::{DeferredCallRecord, PendingCallStore};
pub use registry::{DeliverOutcome, RequestRegistry};
