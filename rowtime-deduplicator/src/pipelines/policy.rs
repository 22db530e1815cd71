use serde::{Deserialize, Serialize};

use crate::error::DeduplicationError;

/// Immutable per-operator deduplication policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationPolicy {
    /// Retain the record with the greatest event time (otherwise the least)
    pub keep_last: bool,
    /// Tag the first winner for a key as INSERT (otherwise UPDATE_AFTER)
    pub emit_insert_on_first: bool,
    /// Emit a retraction of the old value when a winner is replaced
    pub emit_update_before: bool,
    /// Field holding the event time on every record
    pub event_time_field_index: usize,
}

impl DeduplicationPolicy {
    /// Keep the latest row per key, emitting a full retracting changelog.
    pub fn keep_last_row(event_time_field_index: usize) -> Self {
        Self {
            keep_last: true,
            emit_insert_on_first: true,
            emit_update_before: true,
            event_time_field_index,
        }
    }

    /// Keep the earliest row per key, emitting a full retracting changelog.
    pub fn keep_first_row(event_time_field_index: usize) -> Self {
        Self {
            keep_last: false,
            ..Self::keep_last_row(event_time_field_index)
        }
    }

    pub fn with_emit_insert_on_first(mut self, emit_insert_on_first: bool) -> Self {
        self.emit_insert_on_first = emit_insert_on_first;
        self
    }

    pub fn with_emit_update_before(mut self, emit_update_before: bool) -> Self {
        self.emit_update_before = emit_update_before;
        self
    }

    /// Checks the event-time index against the declared record width.
    pub fn validate(&self, field_count: usize) -> Result<(), DeduplicationError> {
        if self.event_time_field_index >= field_count {
            return Err(DeduplicationError::configuration(format!(
                "event time field index {} is out of bounds for records with {} fields",
                self.event_time_field_index, field_count
            )));
        }
        Ok(())
    }
}
