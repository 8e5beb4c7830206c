//! Correlation ids and id generation.
//!
//! A [`CorrelationId`] is only unique among the ids *currently pending*
//! in one RPC namespace. Once its pending entry is removed the same string
//! may be handed out again, so nothing should treat it as a global key.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of generated correlation ids.
pub const CORRELATION_ID_LEN: usize = 16;

const ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Token embedded in a request, its reply and any related follow-up events.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an existing string value.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume self and return the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::ops::Deref for CorrelationId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for CorrelationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

/// Source of candidate correlation ids.
///
/// Collision handling lives in the caller; generators only produce
/// candidates and may repeat themselves.
pub trait IdGenerator: Send + Sync {
    /// Produce the next candidate id.
    fn generate(&self) -> CorrelationId;
}

/// Fixed-length random `[A-Z0-9]` ids.
#[derive(Clone, Copy, Debug)]
pub struct RandomIdGenerator {
    len: usize,
}

impl RandomIdGenerator {
    /// Generator producing ids of `len` characters.
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self { len: len.max(1) }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::with_len(CORRELATION_ID_LEN)
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> CorrelationId {
        let mut rng = rand::rng();
        let id: String = (0..self.len)
            .map(|_| char::from(ID_CHARSET[rng.random_range(0..ID_CHARSET.len())]))
            .collect();
        CorrelationId(id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
