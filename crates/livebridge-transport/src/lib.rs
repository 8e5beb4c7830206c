//! # livebridge-transport
//!
//! Owns the broker side of the bridge:
//!
//! - [`Publisher`]: the outbound seam used by the RPC registry and the runtime
//! - [`MqttConnector`]: the `rumqttc` event loop with reconnect, re-subscribe
//!   and status query on every successful connect
//! - [`MemoryBroker`]: an in-process publisher for tests and local runs

#![deny(unsafe_code)]

pub mod memory;
pub mod mqtt;
pub mod publisher;

pub use memory::MemoryBroker;
pub use mqtt::{ConnectAction, ConnectionState, MqttConnector, connect_actions};
pub use publisher::{Publisher, publish_quietly};
