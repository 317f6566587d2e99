//! Message value types.
//!
//! [`Message<T>`] is the typed envelope handed to application handlers.
//! [`MessageRecord`] is its flat string-keyed form as stored in the backend:
//! the envelope fields below plus whatever payload fields the active codec
//! produced.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::codec::{CodecError, FieldMap, PayloadCodec};

/// Envelope field names reserved inside a [`MessageRecord`].
pub mod field {
    pub const ID: &str = "id";
    pub const CREATED_AT: &str = "created_at";
    pub const RETRY_COUNT: &str = "retry_count";
    pub const CONSUMER_ID: &str = "consumer_id";
}

/// A queued message as seen by application code.
///
/// `id` and `payload` never change after creation. `retry_count` starts at 0
/// and is incremented by exactly 1 on each requeue. `consumer_id` is stamped
/// at enqueue time, never chosen by the publisher.
#[derive(Debug, Clone)]
pub struct Message<T> {
    pub id: Uuid,
    pub payload: T,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub consumer_id: String,
}

impl<T> Message<T> {
    /// Decode a typed message from its stored record.
    pub fn from_record(
        record: &MessageRecord,
        codec: &dyn PayloadCodec<T>,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            id: record.id()?,
            payload: codec.decode(record.fields())?,
            created_at: record.created_at()?,
            retry_count: record.retry_count()?,
            consumer_id: record.consumer_id().unwrap_or_default().to_string(),
        })
    }
}

/// Flat representation of a message: envelope fields plus codec payload
/// fields, stored verbatim in the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    fields: FieldMap,
}

impl MessageRecord {
    /// Build a fresh envelope around already-encoded payload fields.
    ///
    /// Generates the message id and creation timestamp; retry count starts
    /// at zero. The consumer id is left unset until enqueue.
    pub fn envelope(payload_fields: FieldMap) -> Self {
        let mut fields = payload_fields;
        fields.insert(field::ID.to_string(), Uuid::new_v4().to_string());
        fields.insert(field::CREATED_AT.to_string(), Utc::now().to_rfc3339());
        fields.insert(field::RETRY_COUNT.to_string(), "0".to_string());
        Self { fields }
    }

    /// Wrap raw fields read back from the backend.
    pub fn from_fields(fields: FieldMap) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn into_fields(self) -> FieldMap {
        self.fields
    }

    pub fn id(&self) -> Result<Uuid, CodecError> {
        let raw = self
            .fields
            .get(field::ID)
            .ok_or(CodecError::MissingField(field::ID))?;
        raw.parse().map_err(|e: uuid::Error| CodecError::MalformedField {
            field: field::ID,
            reason: e.to_string(),
        })
    }

    pub fn created_at(&self) -> Result<DateTime<Utc>, CodecError> {
        let raw = self
            .fields
            .get(field::CREATED_AT)
            .ok_or(CodecError::MissingField(field::CREATED_AT))?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CodecError::MalformedField {
                field: field::CREATED_AT,
                reason: e.to_string(),
            })
    }

    pub fn retry_count(&self) -> Result<u32, CodecError> {
        let raw = self
            .fields
            .get(field::RETRY_COUNT)
            .ok_or(CodecError::MissingField(field::RETRY_COUNT))?;
        raw.parse().map_err(|e: std::num::ParseIntError| CodecError::MalformedField {
            field: field::RETRY_COUNT,
            reason: e.to_string(),
        })
    }

    pub fn consumer_id(&self) -> Option<&str> {
        self.fields.get(field::CONSUMER_ID).map(String::as_str)
    }

    pub(crate) fn set_consumer_id(&mut self, consumer_id: &str) {
        self.fields
            .insert(field::CONSUMER_ID.to_string(), consumer_id.to_string());
    }

    pub(crate) fn set_retry_count(&mut self, retry_count: u32) {
        self.fields
            .insert(field::RETRY_COUNT.to_string(), retry_count.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;

    #[test]
    fn test_envelope_defaults() {
        let record = MessageRecord::envelope(FieldMap::new());

        assert!(record.id().is_ok());
        assert!(record.created_at().is_ok());
        assert_eq!(record.retry_count().unwrap(), 0);
        assert_eq!(record.consumer_id(), None);
    }

    #[test]
    fn test_record_round_trip_through_codec() {
        let codec = JsonCodec::new();
        let payload = vec!["a".to_string(), "b".to_string()];

        let mut record = MessageRecord::envelope(codec.encode(&payload).unwrap());
        record.set_consumer_id("billing");

        let message: Message<Vec<String>> = Message::from_record(&record, &codec).unwrap();
        assert_eq!(message.payload, payload);
        assert_eq!(message.consumer_id, "billing");
        assert_eq!(message.retry_count, 0);
        assert_eq!(message.id, record.id().unwrap());
    }

    #[test]
    fn test_retry_count_is_mutable_only_through_setter() {
        let mut record = MessageRecord::envelope(FieldMap::new());
        let id_before = record.id().unwrap();

        record.set_retry_count(3);

        assert_eq!(record.retry_count().unwrap(), 3);
        assert_eq!(record.id().unwrap(), id_before);
    }

    #[test]
    fn test_malformed_envelope_fields() {
        let mut fields = FieldMap::new();
        fields.insert(field::ID.to_string(), "not-a-uuid".to_string());
        fields.insert(field::CREATED_AT.to_string(), "yesterday".to_string());
        fields.insert(field::RETRY_COUNT.to_string(), "-1".to_string());
        let record = MessageRecord::from_fields(fields);

        assert!(matches!(record.id(), Err(CodecError::MalformedField { .. })));
        assert!(matches!(
            record.created_at(),
            Err(CodecError::MalformedField { .. })
        ));
        assert!(matches!(
            record.retry_count(),
            Err(CodecError::MalformedField { .. })
        ));
    }
}
