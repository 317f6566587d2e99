//! Payload codecs: mapping an application payload type to and from the
//! flat string-keyed record stored in the backend.
//!
//! A codec owns the payload fields of a record; the message envelope fields
//! (`id`, `created_at`, ...) are managed by the `message` module and never
//! touched by a codec.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Flat string-keyed record, the only representation the backend stores.
pub type FieldMap = HashMap<String, String>;

/// Field the [`JsonCodec`] writes the serialized payload into.
pub const PAYLOAD_FIELD: &str = "payload";

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("stored record is missing field `{0}`")]
    MissingField(&'static str),

    #[error("stored record has malformed field `{field}`: {reason}")]
    MalformedField { field: &'static str, reason: String },
}

/// Maps an application payload to and from record fields.
///
/// Implementations may be lossy or exact; the queue core only requires that
/// `decode(encode(p))` yields a payload the application accepts.
pub trait PayloadCodec<T>: Send + Sync {
    /// Encode a payload into its record fields.
    fn encode(&self, payload: &T) -> Result<FieldMap, CodecError>;

    /// Decode a payload from record fields.
    fn decode(&self, fields: &FieldMap) -> Result<T, CodecError>;
}

/// JSON codec: serializes the whole payload into a single `payload` field.
///
/// Exact for any type whose serde representation round-trips.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl<T> PayloadCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, payload: &T) -> Result<FieldMap, CodecError> {
        let json = serde_json::to_string(payload).map_err(CodecError::Encode)?;
        let mut fields = FieldMap::new();
        fields.insert(PAYLOAD_FIELD.to_string(), json);
        Ok(fields)
    }

    fn decode(&self, fields: &FieldMap) -> Result<T, CodecError> {
        let raw = fields
            .get(PAYLOAD_FIELD)
            .ok_or(CodecError::MissingField(PAYLOAD_FIELD))?;
        serde_json::from_str(raw).map_err(CodecError::Decode)
    }
}
