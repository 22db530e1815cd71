use thiserror::Error;

use crate::record::RecordKey;

/// Why a candidate could not be ordered.
#[derive(strum_macros::Display, Debug, Copy, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    #[strum(serialize = "is missing")]
    MissingField,
    #[strum(serialize = "is null")]
    NullValue,
    #[strum(serialize = "is not a timestamp")]
    NotTemporal,
}

/// State backend operation that failed.
#[derive(strum_macros::Display, Debug, Copy, Clone, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum StateOperation {
    Read,
    Write,
}

/// Errors surfaced by the deduplication core.
///
/// Only [`DeduplicationError::MalformedRecord`] is scoped to a single
/// candidate; every other variant is fatal to the enclosing pipeline, which
/// is expected to recover through its own restart mechanism.
#[derive(Debug, Error)]
pub enum DeduplicationError {
    /// Invalid setup detected before any record is processed
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The state backend failed a read or write
    #[error("State {operation} failed for key {key}")]
    StateAccess {
        key: RecordKey,
        operation: StateOperation,
        #[source]
        source: anyhow::Error,
    },

    /// The candidate carries no comparable event time
    #[error("Malformed record: field {field_index} {reason}")]
    MalformedRecord {
        field_index: usize,
        reason: MalformedReason,
    },

    /// Any other failure, e.g. the output sink going away
    #[error("Deduplication pipeline failed: {0}")]
    Other(#[from] anyhow::Error),
}

impl DeduplicationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        DeduplicationError::Configuration(message.into())
    }

    pub fn state_access(key: RecordKey, operation: StateOperation, source: anyhow::Error) -> Self {
        DeduplicationError::StateAccess {
            key,
            operation,
            source,
        }
    }

    /// Whether the error must halt the pipeline rather than skip one candidate.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DeduplicationError::MalformedRecord { .. })
    }
}
