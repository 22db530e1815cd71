//! Decision engine: which record wins for a key.
//!
//! Everything in here is pure. Ties on equal event time are asymmetric:
//! keeping the last row lets the newer arrival replace the retained one,
//! keeping the first row lets the retained one stand.

use crate::error::DeduplicationError;
use crate::pipelines::DeduplicationPolicy;
use crate::record::Record;

/// Result of comparing a candidate against the retained record.
#[derive(strum_macros::Display, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The retained record stays; nothing is emitted or written
    Reject,
    /// No record was retained for the key yet
    AcceptFirst,
    /// The candidate replaces the retained record
    AcceptReplace,
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Outcome::Reject)
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            Outcome::Reject => "reject",
            Outcome::AcceptFirst => "accept_first",
            Outcome::AcceptReplace => "accept_replace",
        }
    }
}

/// Compares event times only.
pub fn decide_on_event_time(previous: Option<i64>, candidate: i64, keep_last: bool) -> Outcome {
    match previous {
        None => Outcome::AcceptFirst,
        Some(previous) if keep_last && candidate >= previous => Outcome::AcceptReplace,
        Some(previous) if !keep_last && candidate < previous => Outcome::AcceptReplace,
        Some(_) => Outcome::Reject,
    }
}

/// Decides whether `candidate` wins against the retained record.
///
/// Fails with [`DeduplicationError::MalformedRecord`] when either record has
/// no usable event time at the policy's index.
pub fn decide(
    previous: Option<&Record>,
    candidate: &Record,
    policy: &DeduplicationPolicy,
) -> Result<Outcome, DeduplicationError> {
    let index = policy.event_time_field_index;
    let candidate_time = candidate.event_time(index)?;
    let previous_time = previous.map(|p| p.event_time(index)).transpose()?;
    Ok(decide_on_event_time(
        previous_time,
        candidate_time,
        policy.keep_last,
    ))
}
