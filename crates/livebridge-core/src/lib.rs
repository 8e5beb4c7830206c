//! # livebridge-core
//!
//! Shared vocabulary for the live-session bridge crates:
//!
//! - **Envelopes**: [`Envelope`], the immutable `{topic, payload}` transport unit
//! - **Topics**: [`TopicPattern`] matching and the [`Topics`] naming convention
//! - **Correlation ids**: [`CorrelationId`] plus the [`IdGenerator`] seam
//! - **Origins**: [`OriginContext`], the opaque "who asked" payload of deferred calls
//! - **Errors**: transport, RPC and protocol error enums via `thiserror`
//! - **Dirty tracking**: [`DirtyFlag`] for the external snapshot mechanism

#![deny(unsafe_code)]

pub mod dirty;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod metrics;
pub mod origin;
pub mod topics;

pub use dirty::DirtyFlag;
pub use envelope::Envelope;
pub use errors::{HandlerError, ProtocolError, RpcError, TransportError};
pub use ids::{CorrelationId, IdGenerator, RandomIdGenerator};
pub use origin::OriginContext;
pub use topics::{TopicPattern, Topics};
