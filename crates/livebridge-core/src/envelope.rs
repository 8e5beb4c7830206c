//! The transport-level `{topic, payload}` unit.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::ProtocolError;

/// An immutable message as it travels over the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    topic: String,
    payload: Bytes,
}

impl Envelope {
    /// Create an envelope from a topic and raw payload bytes.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Create an envelope with a JSON-encoded payload.
    pub fn json<T: Serialize + ?Sized>(
        topic: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::new(topic, bytes))
    }

    /// The topic this envelope was published on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Last `/`-separated segment of the topic (the RPC name or event kind).
    pub fn topic_tail(&self) -> &str {
        self.topic.rsplit('/').next().unwrap_or_default()
    }

    /// Decode the payload as a typed JSON document.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_slice(&self.payload).map_err(|e| ProtocolError::MalformedPayload {
            topic: self.topic.clone(),
            message: e.to_string(),
        })
    }

    /// Decode the payload as an untyped JSON value.
    ///
    /// An empty payload decodes to `null` so bare signals (`feed`,
    /// `status/started`) need no body.
    pub fn json_value(&self) -> Result<Value, ProtocolError> {
        if self.payload.is_empty() {
            return Ok(Value::Null);
        }
        self.decode()
    }

    /// Read a required string field from a JSON object payload.
    pub fn str_field(&self, field: &'static str) -> Result<String, ProtocolError> {
        let value = self.json_value()?;
        value
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| ProtocolError::MissingField {
                topic: self.topic.clone(),
                field,
            })
    }
}
