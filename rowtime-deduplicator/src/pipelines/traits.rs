//! Traits for pipeline implementations.
//!
//! - [`DeduplicationKeyExtractor`] - How to derive the sequencing key of a record

use crate::error::DeduplicationError;
use crate::record::{Record, RecordKey};

/// Trait for extracting deduplication keys from records.
///
/// Records with equal keys are deduplicated against each other and are
/// sequenced strictly in arrival order. Records with different keys are
/// independent.
pub trait DeduplicationKeyExtractor: Send + Sync {
    /// Extract the key of `record`.
    ///
    /// Fails with [`DeduplicationError::MalformedRecord`] when a key field is
    /// absent from the record.
    fn extract_dedup_key(&self, record: &Record) -> Result<RecordKey, DeduplicationError>;
}
