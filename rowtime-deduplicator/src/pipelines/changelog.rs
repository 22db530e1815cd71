//! Changelog emitter: turns a decision into tagged output records.

use crate::pipelines::{DeduplicationPolicy, Outcome};
use crate::record::{ChangeKind, ChangelogRecord, Record};

/// Produces the changelog records for one decision, in emission order.
///
/// A replacement with `emit_update_before` yields the retraction of
/// `previous` strictly before the new value.
pub fn emit(
    outcome: Outcome,
    previous: Option<&Record>,
    candidate: &Record,
    policy: &DeduplicationPolicy,
) -> Vec<ChangelogRecord> {
    match outcome {
        Outcome::Reject => Vec::new(),
        Outcome::AcceptFirst => {
            let kind = if policy.emit_insert_on_first {
                ChangeKind::Insert
            } else {
                ChangeKind::UpdateAfter
            };
            vec![ChangelogRecord::new(kind, candidate.clone())]
        }
        Outcome::AcceptReplace => {
            let mut changes = Vec::with_capacity(2);
            if policy.emit_update_before {
                if let Some(previous) = previous {
                    changes.push(ChangelogRecord::new(
                        ChangeKind::UpdateBefore,
                        previous.clone(),
                    ));
                }
            }
            changes.push(ChangelogRecord::new(
                ChangeKind::UpdateAfter,
                candidate.clone(),
            ));
            changes
        }
    }
}
