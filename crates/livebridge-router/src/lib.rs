//! # livebridge-router
//!
//! Dispatches inbound envelopes to handlers by topic pattern.
//!
//! One logical worker consumes the transport stream and runs every matching
//! handler for a message before looking at the next one, so handlers observe
//! messages in arrival order. A failing or panicking handler is logged and
//! counted; it never stops the loop.

#![deny(unsafe_code)]

pub mod handler;
pub mod router;

pub use handler::{EventHandler, FnHandler};
pub use router::{DispatchStopped, EventRouter};
