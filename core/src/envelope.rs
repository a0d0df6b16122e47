//! The wire envelope.
//!
//! Every message in either direction is a JSON object with exactly two
//! fields:
//!
//! ```text
//! { "id": <integer>, "msg": <codec-specific value> }
//! ```
//!
//! Outbound envelopes carry an encoded request, inbound ones an encoded
//! response. Both fields are mandatory and `id` must be a non-negative
//! integer; anything else is undecodable.

use crate::error::EnvelopeError;
use crate::id::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A `{ id, msg }` wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation identifier
    pub id: CorrelationId,
    /// Encoded request or response
    pub msg: Value,
}

impl Envelope {
    /// Build an envelope.
    #[must_use]
    pub const fn new(id: CorrelationId, msg: Value) -> Self {
        Self { id, msg }
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Serialize`] if the payload cannot be written.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Serialize(e.to_string()))
    }

    /// Parse JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if the bytes are not JSON, either
    /// field is missing, or `id` is not a non-negative integer.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Interpret an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Envelope::from_slice`].
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        // serde would also accept `[id, msg]`; only objects are envelopes
        if !value.is_object() {
            return Err(EnvelopeError::Malformed("envelope must be a JSON object".to_string()));
        }
        serde_json::from_value(value).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// This envelope as a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        serde_json::json!({ "id": self.id, "msg": self.msg })
    }
}
