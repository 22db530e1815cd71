//! Row-time deduplication step and its synchronous driver.
//!
//! [`deduplicate_on_row_time`] combines the decision engine with the
//! changelog emitter for one candidate. The async sequencer and the
//! synchronous [`RowTimeDeduplicator`] both build on it, so they produce the
//! same changelog for the same per-key input order.

use std::collections::HashMap;

use crate::error::DeduplicationError;
use crate::pipelines::{changelog, decide, DeduplicationPolicy, Outcome};
use crate::record::{ChangelogRecord, Record, RecordKey};

/// Everything one candidate produces.
#[derive(Debug, Clone, PartialEq)]
pub struct DeduplicationStep {
    pub outcome: Outcome,
    /// Changelog records in emission order
    pub changes: Vec<ChangelogRecord>,
    /// New retained value for the key, present only when it must be written
    pub retained: Option<Record>,
}

/// Runs one candidate against the key's retained record.
pub fn deduplicate_on_row_time(
    previous: Option<&Record>,
    candidate: Record,
    policy: &DeduplicationPolicy,
) -> Result<DeduplicationStep, DeduplicationError> {
    let outcome = decide(previous, &candidate, policy)?;
    let changes = changelog::emit(outcome, previous, &candidate, policy);
    let retained = outcome.is_accepted().then_some(candidate);
    Ok(DeduplicationStep {
        outcome,
        changes,
        retained,
    })
}

/// Single-threaded deduplicator with state held in a plain map.
///
/// Every read observes the previous write for the key immediately. Useful
/// as a reference for the async pipeline and for embedding where no
/// asynchronous state backend is involved.
#[derive(Debug)]
pub struct RowTimeDeduplicator {
    policy: DeduplicationPolicy,
    state: HashMap<RecordKey, Record>,
}

impl RowTimeDeduplicator {
    pub fn new(policy: DeduplicationPolicy) -> Self {
        Self {
            policy,
            state: HashMap::new(),
        }
    }

    /// Deduplicates one candidate and returns its changelog records.
    ///
    /// A malformed candidate leaves state untouched.
    pub fn process(
        &mut self,
        key: RecordKey,
        candidate: Record,
    ) -> Result<Vec<ChangelogRecord>, DeduplicationError> {
        let step = deduplicate_on_row_time(self.state.get(&key), candidate, &self.policy)?;
        if let Some(retained) = step.retained {
            self.state.insert(key, retained);
        }
        Ok(step.changes)
    }

    pub fn retained(&self, key: &RecordKey) -> Option<&Record> {
        self.state.get(key)
    }

    pub fn key_count(&self) -> usize {
        self.state.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ChangeKind, FieldValue};

    fn row(key: &str, event_time: i64) -> Record {
        Record::new(vec![key.into(), event_time.into()])
    }

    fn key(key: &str) -> RecordKey {
        RecordKey::from_fields(&[FieldValue::from(key)])
    }

    fn kinds(changes: &[ChangelogRecord]) -> Vec<ChangeKind> {
        changes.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn test_step_retains_only_accepted_candidates() {
        let policy = DeduplicationPolicy::keep_last_row(1);

        let first = deduplicate_on_row_time(None, row("k1", 5), &policy).unwrap();
        assert_eq!(first.outcome, Outcome::AcceptFirst);
        assert_eq!(first.retained, Some(row("k1", 5)));

        let rejected = deduplicate_on_row_time(Some(&row("k1", 5)), row("k1", 3), &policy).unwrap();
        assert_eq!(rejected.outcome, Outcome::Reject);
        assert!(rejected.changes.is_empty());
        assert!(rejected.retained.is_none());
    }

    #[test]
    fn test_keep_last_sequence() {
        let mut dedup = RowTimeDeduplicator::new(DeduplicationPolicy::keep_last_row(1));

        assert_eq!(
            kinds(&dedup.process(key("k1"), row("k1", 5)).unwrap()),
            vec![ChangeKind::Insert]
        );
        assert!(dedup.process(key("k1"), row("k1", 3)).unwrap().is_empty());
        assert_eq!(
            dedup.process(key("k1"), row("k1", 8)).unwrap(),
            vec![
                ChangelogRecord::new(ChangeKind::UpdateBefore, row("k1", 5)),
                ChangelogRecord::new(ChangeKind::UpdateAfter, row("k1", 8)),
            ]
        );
        assert_eq!(dedup.retained(&key("k1")), Some(&row("k1", 8)));
    }

    #[test]
    fn test_keep_first_sequence_without_retractions() {
        let policy = DeduplicationPolicy::keep_first_row(1)
            .with_emit_insert_on_first(false)
            .with_emit_update_before(false);
        let mut dedup = RowTimeDeduplicator::new(policy);

        assert_eq!(
            dedup.process(key("k1"), row("k1", 5)).unwrap(),
            vec![ChangelogRecord::new(ChangeKind::UpdateAfter, row("k1", 5))]
        );
        assert_eq!(
            dedup.process(key("k1"), row("k1", 3)).unwrap(),
            vec![ChangelogRecord::new(ChangeKind::UpdateAfter, row("k1", 3))]
        );
        assert!(dedup.process(key("k1"), row("k1", 8)).unwrap().is_empty());
        assert_eq!(dedup.retained(&key("k1")), Some(&row("k1", 3)));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut dedup = RowTimeDeduplicator::new(DeduplicationPolicy::keep_last_row(1));

        dedup.process(key("k1"), row("k1", 10)).unwrap();
        let changes = dedup.process(key("k2"), row("k2", 1)).unwrap();

        assert_eq!(kinds(&changes), vec![ChangeKind::Insert]);
        assert_eq!(dedup.key_count(), 2);
    }

    #[test]
    fn test_malformed_candidate_leaves_state_untouched() {
        let mut dedup = RowTimeDeduplicator::new(DeduplicationPolicy::keep_last_row(1));
        dedup.process(key("k1"), row("k1", 5)).unwrap();

        let malformed = Record::new(vec!["k1".into(), FieldValue::Null]);
        assert!(dedup.process(key("k1"), malformed).is_err());
        assert_eq!(dedup.retained(&key("k1")), Some(&row("k1", 5)));
    }
}
