//! Shared test utilities for the rowtime-deduplicator crate.
//!
//! Builders for the `[key, event_time, payload]` record layout used across
//! unit and integration tests.

use crate::record::{FieldValue, KeyedRecord, Record, RecordKey};

/// Key of a record whose first field is `key`.
pub fn key_of(key: &str) -> RecordKey {
    RecordKey::from_fields(&[FieldValue::from(key)])
}

/// A `[key, event_time, payload]` record.
pub fn record(key: &str, event_time: i64, payload: &str) -> Record {
    Record::new(vec![key.into(), event_time.into(), payload.into()])
}

/// A `[key, event_time, payload]` record paired with its key.
pub fn keyed_record(key: &str, event_time: i64, payload: &str) -> KeyedRecord {
    KeyedRecord::new(key_of(key), record(key, event_time, payload))
}
