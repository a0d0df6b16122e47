//! Pluggable request/response codecs.
//!
//! The correlator never looks inside payloads. A [`Codec`] turns requests
//! into the `msg` value of an outbound envelope and turns the `msg` value of
//! an inbound envelope back into a response.
//!
//! Two implementations are provided:
//! - [`JsonCodec`] for serde types
//! - [`FnCodec`] for a pair of plain functions

use crate::error::CodecError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Converts requests to wire values and wire values to responses.
pub trait Codec: Send + Sync {
    /// Outbound request type
    type Request: Send + 'static;

    /// Inbound response type
    type Response: Send + 'static;

    /// Encode a request for the `msg` field.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the request cannot be represented.
    fn encode_request(&self, request: &Self::Request) -> Result<Value, CodecError>;

    /// Decode the `msg` field of an inbound envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the value is not a valid response.
    fn decode_response(&self, value: Value) -> Result<Self::Response, CodecError>;
}

/// Codec for any serde-serializable request and deserializable response.
pub struct JsonCodec<Req, Resp> {
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> JsonCodec<Req, Resp> {
    /// Create a JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self { _types: PhantomData }
    }
}

impl<Req, Resp> Default for JsonCodec<Req, Resp> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> Clone for JsonCodec<Req, Resp> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<Req, Resp> fmt::Debug for JsonCodec<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<Req, Resp> Codec for JsonCodec<Req, Resp>
where
    Req: Serialize + Send + 'static,
    Resp: DeserializeOwned + Send + 'static,
{
    type Request = Req;
    type Response = Resp;

    fn encode_request(&self, request: &Req) -> Result<Value, CodecError> {
        serde_json::to_value(request).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_response(&self, value: Value) -> Result<Resp, CodecError> {
        serde_json::from_value(value).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Codec assembled from an encode function and a decode function.
///
/// ```
/// use porter_core::codec::{Codec, FnCodec};
/// use porter_core::CodecError;
/// use serde_json::{json, Value};
///
/// let codec = FnCodec::new(
///     |n: &u32| Ok(json!(n.to_string())),
///     |v: Value| v.as_str().map(str::len).ok_or_else(|| CodecError::Decode("expected string".into())),
/// );
/// assert_eq!(codec.encode_request(&7).unwrap(), json!("7"));
/// assert_eq!(codec.decode_response(json!("abc")).unwrap(), 3);
/// ```
pub struct FnCodec<Req, Resp, Enc, Dec> {
    encode: Enc,
    decode: Dec,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, Enc, Dec> FnCodec<Req, Resp, Enc, Dec>
where
    Enc: Fn(&Req) -> Result<Value, CodecError>,
    Dec: Fn(Value) -> Result<Resp, CodecError>,
{
    /// Build a codec from two functions.
    #[must_use]
    pub const fn new(encode: Enc, decode: Dec) -> Self {
        Self {
            encode,
            decode,
            _types: PhantomData,
        }
    }
}

impl<Req, Resp, Enc, Dec> fmt::Debug for FnCodec<Req, Resp, Enc, Dec> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnCodec")
    }
}

impl<Req, Resp, Enc, Dec> Codec for FnCodec<Req, Resp, Enc, Dec>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    Enc: Fn(&Req) -> Result<Value, CodecError> + Send + Sync,
    Dec: Fn(Value) -> Result<Resp, CodecError> + Send + Sync,
{
    type Request = Req;
    type Response = Resp;

    fn encode_request(&self, request: &Req) -> Result<Value, CodecError> {
        (self.encode)(request)
    }

    fn decode_response(&self, value: Value) -> Result<Resp, CodecError> {
        (self.decode)(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    enum Lookup {
        Found { name: String },
        Missing,
    }

    #[test]
    fn test_json_codec_round_trips_strings() {
        let codec = JsonCodec::<String, String>::new();
        assert_eq!(codec.encode_request(&"hello".to_string()).unwrap(), json!("hello"));
        assert_eq!(codec.decode_response(json!("olleh")).unwrap(), "olleh");
    }

    #[test]
    fn test_json_codec_tagged_response() {
        let codec = JsonCodec::<u32, Lookup>::new();
        assert_eq!(
            codec.decode_response(json!({ "status": "found", "name": "ada" })).unwrap(),
            Lookup::Found { name: "ada".to_string() }
        );
        assert_eq!(codec.decode_response(json!({ "status": "missing" })).unwrap(), Lookup::Missing);
    }

    #[test]
    fn test_json_codec_decode_failure() {
        let codec = JsonCodec::<String, String>::new();
        assert!(matches!(codec.decode_response(json!(42)), Err(CodecError::Decode(_))));
    }
}
