//! Error taxonomy for the bridge.
//!
//! - [`TransportError`]: connection loss or a failed publish. Retried by the
//!   connect loop or logged and dropped; never fatal.
//! - [`RpcError`]: what an `issue` caller can observe. Only
//!   [`RpcError::Timeout`] and [`RpcError::Remote`] are expected in normal
//!   operation; the rest indicate misuse or shutdown.
//! - [`ProtocolError`]: malformed inbound payloads and unroutable topics.
//!   Logged and dropped by the dispatch loop.
//! - [`HandlerError`]: what a routed handler returns.
//!
//! Duplicate correlation ids and stale replies have no error value: the
//! former is resolved by regeneration inside id allocation, the latter is a
//! silent no-op reported as an outcome, not a failure.

use thiserror::Error;

// ── Error code constants ────────────────────────────────────────────

/// No reply arrived before the deadline.
pub const RPC_TIMEOUT: &str = "RPC_TIMEOUT";
/// The remote side answered but rejected the call.
pub const REMOTE_REJECTED: &str = "REMOTE_REJECTED";
/// No free correlation id could be allocated.
pub const ID_SPACE_EXHAUSTED: &str = "ID_SPACE_EXHAUSTED";
/// The registry was shut down while the call was pending.
pub const RPC_CANCELLED: &str = "RPC_CANCELLED";
/// The request payload could not be encoded.
pub const ENCODE_ERROR: &str = "ENCODE_ERROR";
/// The reply payload did not match the expected shape.
pub const DECODE_ERROR: &str = "DECODE_ERROR";

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker connection failed or dropped.
    #[error("broker connection failed: {message}")]
    Connection {
        /// Description from the underlying client.
        message: String,
    },

    /// Publishing a single message failed.
    #[error("publish to {topic} failed: {message}")]
    Publish {
        /// Target topic.
        topic: String,
        /// Description from the underlying client.
        message: String,
    },

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}

/// Failures surfaced to RPC callers.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No reply within the deadline.
    #[error("{namespace} call {id} timed out after {timeout_ms}ms")]
    Timeout {
        /// RPC kind name.
        namespace: String,
        /// Correlation id of the abandoned call.
        id: String,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// The remote controller answered with a business-level rejection.
    #[error("{reason}")]
    Remote {
        /// RPC kind name.
        namespace: String,
        /// Human-readable reason as reported by the remote side.
        reason: String,
    },

    /// Every candidate id collided with a pending call.
    #[error("no free correlation id in {namespace} after {attempts} attempts")]
    IdSpaceExhausted {
        /// RPC kind name.
        namespace: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The registry dropped the waiter during shutdown.
    #[error("{namespace} call {id} cancelled")]
    Cancelled {
        /// RPC kind name.
        namespace: String,
        /// Correlation id of the cancelled call.
        id: String,
    },

    /// The request payload could not be turned into a JSON object.
    #[error("cannot encode {namespace} request: {message}")]
    Encode {
        /// RPC kind name.
        namespace: String,
        /// What went wrong.
        message: String,
    },

    /// The reply did not decode into the expected response type.
    #[error("cannot decode {namespace} reply: {message}")]
    Decode {
        /// RPC kind name.
        namespace: String,
        /// What went wrong.
        message: String,
    },
}

impl RpcError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => RPC_TIMEOUT,
            Self::Remote { .. } => REMOTE_REJECTED,
            Self::IdSpaceExhausted { .. } => ID_SPACE_EXHAUSTED,
            Self::Cancelled { .. } => RPC_CANCELLED,
            Self::Encode { .. } => ENCODE_ERROR,
            Self::Decode { .. } => DECODE_ERROR,
        }
    }

    /// RPC kind the error belongs to.
    pub fn namespace(&self) -> &str {
        match self {
            Self::Timeout { namespace, .. }
            | Self::Remote { namespace, .. }
            | Self::IdSpaceExhausted { namespace, .. }
            | Self::Cancelled { namespace, .. }
            | Self::Encode { namespace, .. }
            | Self::Decode { namespace, .. } => namespace,
        }
    }

    /// Whether the caller should show this error to a user as-is.
    ///
    /// Timeouts and remote rejections are user-facing; everything else is an
    /// internal fault.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Remote { .. })
    }
}

/// Inbound protocol violations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload is not valid JSON or has the wrong shape.
    #[error("malformed payload on {topic}: {message}")]
    MalformedPayload {
        /// Topic the payload arrived on.
        topic: String,
        /// Decoder message.
        message: String,
    },

    /// A required field is missing or has the wrong type.
    #[error("missing field `{field}` on {topic}")]
    MissingField {
        /// Topic the payload arrived on.
        topic: String,
        /// Field name.
        field: &'static str,
    },

    /// No registered pattern matches the topic.
    #[error("no handler for {topic}")]
    NoHandler {
        /// Unroutable topic.
        topic: String,
    },
}

/// Failure reported by a routed handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The envelope violated the wire protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Any other handler failure.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Build a generic failure from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_code_and_message() {
        let err = RpcError::Timeout {
            namespace: "ping".into(),
            id: "ABC".into(),
            timeout_ms: 1000,
        };
        assert_eq!(err.code(), RPC_TIMEOUT);
        assert_eq!(err.namespace(), "ping");
        assert_eq!(err.to_string(), "ping call ABC timed out after 1000ms");
        assert!(err.is_user_facing());
    }

    #[test]
    fn remote_displays_reason_only() {
        let err = RpcError::Remote {
            namespace: "whac_a_mole".into(),
            reason: "all slots are taken".into(),
        };
        assert_eq!(err.code(), REMOTE_REJECTED);
        assert_eq!(err.to_string(), "all slots are taken");
        assert!(err.is_user_facing());
    }

    #[test]
    fn internal_errors_are_not_user_facing() {
        let err = RpcError::IdSpaceExhausted {
            namespace: "echo".into(),
            attempts: 10,
        };
        assert_eq!(err.code(), ID_SPACE_EXHAUSTED);
        assert!(!err.is_user_facing());

        let err = RpcError::Cancelled {
            namespace: "echo".into(),
            id: "X".into(),
        };
        assert_eq!(err.code(), RPC_CANCELLED);
        assert!(!err.is_user_facing());
    }

    #[test]
    fn handler_error_wraps_protocol_error() {
        let err: HandlerError = ProtocolError::NoHandler {
            topic: "/x".into(),
        }
        .into();
        assert_eq!(err.to_string(), "no handler for /x");
    }

    #[test]
    fn transport_publish_message() {
        let err = TransportError::Publish {
            topic: "/live/req/ping".into(),
            message: "queue full".into(),
        };
        assert_eq!(err.to_string(), "publish to /live/req/ping failed: queue full");
    }
}
