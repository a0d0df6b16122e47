//! Error types for correlation, envelopes, and codecs.
//!
//! Malformed or unmatched inbound traffic is not an error: the correlator
//! reports it as a discard. These types cover the remaining defect paths.

use crate::id::CorrelationId;
use thiserror::Error;

/// Errors from encoding requests or decoding responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A request could not be turned into a wire value
    #[error("Failed to encode request: {0}")]
    Encode(String),

    /// A wire value could not be turned into a response
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// Errors from reading or writing the `{ id, msg }` envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The bytes are not a well-formed envelope
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The envelope could not be serialized
    #[error("Failed to serialize envelope: {0}")]
    Serialize(String),
}

/// Errors raised while dispatching a chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// An entry already exists for this identifier
    #[error("Correlation id {0} is already pending")]
    DuplicateId(CorrelationId),

    /// Every identifier in the space is pending
    #[error("All {capacity} correlation ids are pending")]
    IdSpaceExhausted {
        /// Size of the identifier space
        capacity: u64,
    },

    /// The request could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The outbound envelope could not be built
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Malformed(err.to_string())
        } else {
            Self::Serialize(err.to_string())
        }
    }
}
