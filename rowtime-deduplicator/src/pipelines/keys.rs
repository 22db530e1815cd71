//! Deduplication key extraction by field position.

use crate::error::{DeduplicationError, MalformedReason};
use crate::pipelines::traits::DeduplicationKeyExtractor;
use crate::record::{Record, RecordKey};

/// Selects an ordered list of fields as the deduplication key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySelector {
    indices: Vec<usize>,
}

impl KeySelector {
    /// Builds a selector, checking every index against the record width.
    pub fn new(indices: Vec<usize>, field_count: usize) -> Result<Self, DeduplicationError> {
        if indices.is_empty() {
            return Err(DeduplicationError::configuration(
                "at least one key field index is required",
            ));
        }
        if let Some(index) = indices.iter().find(|index| **index >= field_count) {
            return Err(DeduplicationError::configuration(format!(
                "key field index {index} is out of bounds for records with {field_count} fields"
            )));
        }
        Ok(Self { indices })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn extract(&self, record: &Record) -> Result<RecordKey, DeduplicationError> {
        let fields = self
            .indices
            .iter()
            .map(|index| {
                record
                    .field(*index)
                    .ok_or(DeduplicationError::MalformedRecord {
                        field_index: *index,
                        reason: MalformedReason::MissingField,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RecordKey::from_fields(fields))
    }
}

impl DeduplicationKeyExtractor for KeySelector {
    fn extract_dedup_key(&self, record: &Record) -> Result<RecordKey, DeduplicationError> {
        self.extract(record)
    }
}
