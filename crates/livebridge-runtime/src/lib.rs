//! # livebridge-runtime
//!
//! Puts the bridge together:
//!
//! - [`LiveBridge`]: owns the registry, deferred store and session monitor,
//!   and builds the router with the standard topic handlers
//! - [`BridgeEvent`]: what the bridge tells the chat and ledger layers
//! - [`timers`]: the session watchdog and the deferred-record sweeper
//! - [`ShutdownCoordinator`]: cancels and drains the spawned tasks

#![deny(unsafe_code)]

pub mod bridge;
pub mod events;
pub mod handlers;
pub mod shutdown;
pub mod timers;

pub use bridge::LiveBridge;
pub use events::BridgeEvent;
pub use shutdown::ShutdownCoordinator;
