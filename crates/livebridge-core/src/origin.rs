//! Opaque origin of a deferred call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who asked for a call and where its late outcome should be reported.
///
/// The bridge never inspects the contents; the command layer decides what
/// goes in (a chat group and member, a reply handle) and reads it back when
/// the follow-up event resolves the record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginContext(Value);

impl OriginContext {
    /// Wrap a JSON value.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the wrapped value.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Consume and return the wrapped value.
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for OriginContext {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
