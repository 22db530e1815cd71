//! Row-time deduplication over an asynchronous keyed state store.
//!
//! Candidates are grouped by key. For each key exactly one record is
//! retained, chosen by event time (the latest or the earliest, depending on
//! the [`pipelines::DeduplicationPolicy`]), and every change of the retained
//! record is emitted as a changelog of `+I`, `-U` and `+U` records.
//!
//! ## Error logging
//!
//! State failures arrive as `anyhow::Error` wrapped in
//! [`DeduplicationError::StateAccess`], so the backend's cause chain must
//! survive logging. Log errors as a structured `error = ?e` field or inline
//! with `{e:#}`; plain Display (`%e`, `{e}`) prints only the outer message.
//! Wrap lower-level failures with `.context()` rather than formatting them
//! into a new message.

pub mod config;
pub mod error;
pub mod metrics;
pub mod metrics_const;
pub mod partition;
pub mod pipelines;
pub mod record;
pub mod sequencer;
pub mod sink;
pub mod store;
pub mod test_utils;
pub mod utils;

// Re-export commonly used types for convenience
pub use error::DeduplicationError;
pub use pipelines::{DeduplicationKeyExtractor, DeduplicationPolicy, KeySelector, Outcome};
pub use record::{ChangeKind, ChangelogRecord, FieldValue, KeyedRecord, Record, RecordKey};
pub use sequencer::{KeySequencer, SequencerStats};
pub use store::{InMemoryStateBackend, StateBackend};
