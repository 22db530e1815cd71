//! Record model shared by every stage of the deduplicator.
//!
//! A [`Record`] is an ordered tuple of typed fields. Input records carry no
//! change tag (every candidate is a logical upsert); output records are
//! wrapped in a [`ChangelogRecord`] tagged with their [`ChangeKind`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeduplicationError, MalformedReason};

/// A single typed field value.
///
/// Serialized untagged so NDJSON input can be written as plain arrays, e.g.
/// `["k1", 5, "payload"]`. RFC 3339 strings deserialize as timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    String(String),
}

impl FieldValue {
    /// Returns the value as event-time milliseconds, if it is temporal.
    pub fn as_event_time(&self) -> Option<i64> {
        match self {
            FieldValue::Long(millis) => Some(*millis),
            FieldValue::Timestamp(ts) => Some(ts.timestamp_millis()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Appends a self-delimiting binary encoding of this value to `buf`.
    ///
    /// Format: `[1 byte tag][payload]`, strings are length-prefixed so that
    /// concatenated fields never collide.
    fn write_key_bytes(&self, buf: &mut Vec<u8>) {
        match self {
            FieldValue::Null => buf.push(0),
            FieldValue::Bool(value) => {
                buf.push(1);
                buf.push(u8::from(*value));
            }
            FieldValue::Long(value) => {
                buf.push(2);
                buf.extend_from_slice(&value.to_be_bytes());
            }
            FieldValue::Double(value) => {
                buf.push(3);
                buf.extend_from_slice(&value.to_bits().to_be_bytes());
            }
            FieldValue::Timestamp(ts) => {
                buf.push(4);
                buf.extend_from_slice(&ts.timestamp().to_be_bytes());
                buf.extend_from_slice(&ts.timestamp_subsec_nanos().to_be_bytes());
            }
            FieldValue::String(value) => {
                buf.push(5);
                let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(value.as_bytes());
            }
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Long(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Double(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// An ordered tuple of typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Vec<FieldValue>,
}

impl Record {
    pub fn new(fields: Vec<FieldValue>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldValue> {
        self.fields.get(index)
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Extracts the event time stored at `index`.
    ///
    /// A missing, null or non-temporal value makes the record malformed: no
    /// ordering decision can be taken without a comparable event time.
    pub fn event_time(&self, index: usize) -> Result<i64, DeduplicationError> {
        let malformed = |reason| DeduplicationError::MalformedRecord {
            field_index: index,
            reason,
        };
        match self.fields.get(index) {
            None => Err(malformed(MalformedReason::MissingField)),
            Some(FieldValue::Null) => Err(malformed(MalformedReason::NullValue)),
            Some(value) => value
                .as_event_time()
                .ok_or_else(|| malformed(MalformedReason::NotTemporal)),
        }
    }
}

/// Opaque key identifying the partition of the stream a record is sequenced in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(Vec<u8>);

impl RecordKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Builds a key from an ordered selection of field values.
    pub fn from_fields<'a, I>(fields: I) -> Self
    where
        I: IntoIterator<Item = &'a FieldValue>,
    {
        let mut bytes = Vec::new();
        for field in fields {
            field.write_key_bytes(&mut bytes);
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A candidate paired with the key it is sequenced under.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRecord {
    pub key: RecordKey,
    pub record: Record,
}

impl KeyedRecord {
    pub fn new(key: RecordKey, record: Record) -> Self {
        Self { key, record }
    }
}

/// Change kind attached to every emitted record.
#[derive(
    strum_macros::Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum ChangeKind {
    #[strum(serialize = "+I")]
    #[serde(rename = "+I")]
    Insert,
    #[strum(serialize = "-U")]
    #[serde(rename = "-U")]
    UpdateBefore,
    #[strum(serialize = "+U")]
    #[serde(rename = "+U")]
    UpdateAfter,
    #[strum(serialize = "-D")]
    #[serde(rename = "-D")]
    Delete,
}

impl ChangeKind {
    /// Retractions instruct consumers to remove a previously emitted value.
    pub fn is_retraction(&self) -> bool {
        matches!(self, ChangeKind::UpdateBefore | ChangeKind::Delete)
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::UpdateBefore => "update_before",
            ChangeKind::UpdateAfter => "update_after",
            ChangeKind::Delete => "delete",
        }
    }
}

/// A record tagged with its change kind, as handed to the output sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogRecord {
    pub kind: ChangeKind,
    pub record: Record,
}

impl ChangelogRecord {
    pub fn new(kind: ChangeKind, record: Record) -> Self {
        Self { kind, record }
    }
}

impl fmt::Display for ChangelogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.kind, self.record.fields())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_time_from_long_and_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = Record::new(vec!["k1".into(), 42_i64.into(), ts.into()]);

        assert_eq!(record.event_time(1).unwrap(), 42);
        assert_eq!(record.event_time(2).unwrap(), ts.timestamp_millis());
    }

    #[test]
    fn test_event_time_rejects_null_missing_and_non_temporal() {
        let record = Record::new(vec!["k1".into(), FieldValue::Null]);

        let null = record.event_time(1).unwrap_err();
        assert!(matches!(
            null,
            DeduplicationError::MalformedRecord {
                field_index: 1,
                reason: MalformedReason::NullValue
            }
        ));

        let missing = record.event_time(5).unwrap_err();
        assert!(matches!(
            missing,
            DeduplicationError::MalformedRecord {
                reason: MalformedReason::MissingField,
                ..
            }
        ));

        let not_temporal = record.event_time(0).unwrap_err();
        assert!(matches!(
            not_temporal,
            DeduplicationError::MalformedRecord {
                reason: MalformedReason::NotTemporal,
                ..
            }
        ));
    }

    #[test]
    fn test_record_deserializes_from_plain_json_array() {
        let record: Record =
            serde_json::from_str(r#"["k1", 5, 1.5, true, null, "2024-01-01T00:00:00Z"]"#)
                .unwrap();

        assert_eq!(record.arity(), 6);
        assert_eq!(record.field(0), Some(&FieldValue::String("k1".to_string())));
        assert_eq!(record.field(1), Some(&FieldValue::Long(5)));
        assert_eq!(record.field(2), Some(&FieldValue::Double(1.5)));
        assert_eq!(record.field(3), Some(&FieldValue::Bool(true)));
        assert!(record.field(4).unwrap().is_null());
        assert!(matches!(record.field(5), Some(FieldValue::Timestamp(_))));
    }

    #[test]
    fn test_record_keys_do_not_collide_on_concatenation() {
        let ab_c = RecordKey::from_fields(&[FieldValue::from("ab"), FieldValue::from("c")]);
        let a_bc = RecordKey::from_fields(&[FieldValue::from("a"), FieldValue::from("bc")]);
        let same = RecordKey::from_fields(&[FieldValue::from("ab"), FieldValue::from("c")]);

        assert_ne!(ab_c, a_bc);
        assert_eq!(ab_c, same);
    }

    #[test]
    fn test_record_keys_keep_sub_millisecond_timestamps_apart() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = ts + chrono::Duration::microseconds(250);

        let key = RecordKey::from_fields(&[FieldValue::from(ts)]);
        let later_key = RecordKey::from_fields(&[FieldValue::from(later)]);

        assert_eq!(ts.timestamp_millis(), later.timestamp_millis());
        assert_ne!(key, later_key);
        assert_eq!(key, RecordKey::from_fields(&[FieldValue::from(ts)]));
    }

    #[test]
    fn test_change_kind_renders_short_strings() {
        assert_eq!(ChangeKind::Insert.to_string(), "+I");
        assert_eq!(ChangeKind::UpdateBefore.to_string(), "-U");
        assert_eq!(ChangeKind::UpdateAfter.to_string(), "+U");
        assert_eq!(ChangeKind::Delete.to_string(), "-D");
        assert!(ChangeKind::UpdateBefore.is_retraction());
        assert!(!ChangeKind::UpdateAfter.is_retraction());
    }

    #[test]
    fn test_changelog_record_serializes_kind_and_fields() {
        let change = ChangelogRecord::new(
            ChangeKind::UpdateAfter,
            Record::new(vec!["k1".into(), 8_i64.into()]),
        );

        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(json, r#"{"kind":"+U","record":["k1",8]}"#);
    }
}
