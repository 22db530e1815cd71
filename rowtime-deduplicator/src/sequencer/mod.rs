//! Per-key sequencer over an asynchronous state backend.
//!
//! # Ordering
//!
//! For every key at most one candidate is *active*: its read has been
//! issued and its decision has not been taken yet. Later candidates for the
//! same key are parked in a FIFO queue. When the active candidate's read
//! resolves, the sequencer decides, issues the write (if any), emits the
//! changelog and only then issues the read of the next parked candidate.
//! Together with the backend's per-key issue-order contract, that read
//! observes the write even if the write has not completed yet.
//!
//! Candidates for different keys proceed concurrently, and their reads may
//! complete in any order.
//!
//! # Backpressure
//!
//! [`KeySequencer::run`] stops pulling input while too many keys are active
//! or too many candidates are parked, and resumes as completions drain them.
//!
//! Writes are fire-and-forget. Their completions are polled alongside the
//! reads only to surface failures, which are fatal.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{DeduplicationError, StateOperation};
use crate::metrics::MetricsHelper;
use crate::metrics_const::{
    ACTIVE_KEYS_GAUGE, CANDIDATES_TOTAL_COUNTER, CHANGELOG_RECORDS_EMITTED_COUNTER,
    DEDUPLICATION_OUTCOME_COUNTER, MALFORMED_RECORDS_COUNTER, PARKED_CANDIDATES_GAUGE,
    STATE_ACCESS_ERRORS_COUNTER, STATE_READ_DURATION_HISTOGRAM, WORKER_BACKPRESSURE_COUNTER,
    WRITES_IN_FLIGHT_GAUGE,
};
use crate::pipelines::{deduplicate_on_row_time, DeduplicationPolicy, Outcome};
use crate::record::{KeyedRecord, Record, RecordKey};
use crate::sink::ChangelogSink;
use crate::store::StateBackend;

/// Upper bound on keys with an active candidate before input is paused.
pub const DEFAULT_MAX_ACTIVE_KEYS: usize = 10_000;

/// Upper bound on candidates parked across all keys before input is paused.
pub const DEFAULT_MAX_PARKED_CANDIDATES: usize = 100_000;

/// Counters for everything a sequencer did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequencerStats {
    pub candidates: u64,
    pub accepted_first: u64,
    pub replaced: u64,
    pub rejected: u64,
    pub malformed: u64,
    /// Candidates that had to wait behind an earlier one for the same key
    pub parked: u64,
    pub changes_emitted: u64,
    pub reads_issued: u64,
    pub writes_issued: u64,
    pub writes_completed: u64,
}

impl SequencerStats {
    pub fn merge(&mut self, other: &SequencerStats) {
        self.candidates += other.candidates;
        self.accepted_first += other.accepted_first;
        self.replaced += other.replaced;
        self.rejected += other.rejected;
        self.malformed += other.malformed;
        self.parked += other.parked;
        self.changes_emitted += other.changes_emitted;
        self.reads_issued += other.reads_issued;
        self.writes_issued += other.writes_issued;
        self.writes_completed += other.writes_completed;
    }

    pub fn decisions(&self) -> u64 {
        self.accepted_first + self.replaced + self.rejected
    }
}

enum Completion {
    Read {
        key: RecordKey,
        candidate: Record,
        issued_at: Instant,
        result: anyhow::Result<Option<Record>>,
    },
    Write {
        key: RecordKey,
        result: anyhow::Result<()>,
    },
}

pub struct KeySequencer<S: ChangelogSink> {
    partition: u32,
    policy: DeduplicationPolicy,
    backend: Arc<dyn StateBackend>,
    sink: S,
    /// Keys with an active candidate, mapped to the candidates parked behind it
    active_keys: HashMap<RecordKey, VecDeque<Record>>,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
    parked_now: usize,
    writes_in_flight: usize,
    max_active_keys: usize,
    max_parked_candidates: usize,
    stats: SequencerStats,
    metrics: MetricsHelper,
}

impl<S: ChangelogSink> KeySequencer<S> {
    /// Builds a sequencer for records declared to carry `field_count` fields.
    ///
    /// Fails with [`DeduplicationError::Configuration`] if the policy does
    /// not fit that schema, before any record is accepted.
    pub fn new(
        policy: DeduplicationPolicy,
        field_count: usize,
        backend: Arc<dyn StateBackend>,
        sink: S,
    ) -> Result<Self, DeduplicationError> {
        policy.validate(field_count)?;
        Ok(Self {
            partition: 0,
            policy,
            backend,
            sink,
            active_keys: HashMap::new(),
            in_flight: FuturesUnordered::new(),
            parked_now: 0,
            writes_in_flight: 0,
            max_active_keys: DEFAULT_MAX_ACTIVE_KEYS,
            max_parked_candidates: DEFAULT_MAX_PARKED_CANDIDATES,
            stats: SequencerStats::default(),
            metrics: MetricsHelper::with_partition(0),
        })
    }

    pub fn with_partition(mut self, partition: u32) -> Self {
        self.partition = partition;
        self.metrics = MetricsHelper::with_partition(partition);
        self
    }

    /// Caps the number of keys processed concurrently by [`Self::run`].
    pub fn with_max_active_keys(mut self, max_active_keys: usize) -> Self {
        self.max_active_keys = max_active_keys.max(1);
        self
    }

    /// Caps the number of parked candidates held by [`Self::run`].
    pub fn with_max_parked_candidates(mut self, max_parked_candidates: usize) -> Self {
        self.max_parked_candidates = max_parked_candidates;
        self
    }

    pub fn stats(&self) -> &SequencerStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn active_key_count(&self) -> usize {
        self.active_keys.len()
    }

    pub fn parked_count(&self) -> usize {
        self.parked_now
    }

    pub fn writes_in_flight(&self) -> usize {
        self.writes_in_flight
    }

    /// Whether no read or write is outstanding.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Accepts a candidate for `key`.
    ///
    /// The read for the candidate is issued immediately unless an earlier
    /// candidate for the same key is still active, in which case it is
    /// parked. A candidate without a usable event time is rejected here with
    /// [`DeduplicationError::MalformedRecord`] and leaves the key untouched.
    pub fn submit(&mut self, key: RecordKey, candidate: Record) -> Result<(), DeduplicationError> {
        self.stats.candidates += 1;
        self.metrics.counter(CANDIDATES_TOTAL_COUNTER).increment(1);

        if let Err(e) = candidate.event_time(self.policy.event_time_field_index) {
            self.stats.malformed += 1;
            self.metrics.counter(MALFORMED_RECORDS_COUNTER).increment(1);
            return Err(e);
        }

        match self.active_keys.get_mut(&key) {
            Some(parked) => {
                parked.push_back(candidate);
                self.stats.parked += 1;
                self.parked_now += 1;
                self.metrics
                    .gauge(PARKED_CANDIDATES_GAUGE)
                    .set(self.parked_now as f64);
            }
            None => {
                self.active_keys.insert(key.clone(), VecDeque::new());
                self.metrics
                    .gauge(ACTIVE_KEYS_GAUGE)
                    .set(self.active_keys.len() as f64);
                self.issue_read(key, candidate);
            }
        }
        Ok(())
    }

    /// Waits for the next read or write to complete and applies it.
    ///
    /// Returns `None` once nothing is in flight.
    pub async fn process_next(&mut self) -> Option<Result<(), DeduplicationError>> {
        let completion = self.in_flight.next().await?;
        Some(self.apply_completion(completion).await)
    }

    /// Processes completions until every parked candidate has been decided
    /// and every issued write has completed.
    pub async fn drain(&mut self) -> Result<(), DeduplicationError> {
        while let Some(result) = self.process_next().await {
            result?;
        }
        Ok(())
    }

    /// Runs the sequencer until `input` is closed and all work is drained.
    ///
    /// Malformed candidates are logged and skipped. Any other error stops
    /// the sequencer and is returned; writes still in flight at that point
    /// are abandoned.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<KeyedRecord>,
    ) -> Result<SequencerStats, DeduplicationError> {
        info!(partition = self.partition, "Starting key sequencer");

        let mut input_open = true;
        while input_open {
            // Parked candidates always sit behind an in-flight read, so the
            // loop keeps making progress while input is paused.
            let accepting = (self.active_keys.len() < self.max_active_keys
                && self.parked_now < self.max_parked_candidates)
                || self.is_idle();
            if !accepting {
                self.metrics.counter(WORKER_BACKPRESSURE_COUNTER).increment(1);
            }

            tokio::select! {
                biased;

                Some(completion) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.apply_completion(completion).await?;
                }

                received = input.recv(), if accepting => match received {
                    Some(KeyedRecord { key, record }) => {
                        if let Err(e) = self.submit(key, record) {
                            if e.is_fatal() {
                                return Err(e);
                            }
                            warn!(partition = self.partition, error = ?e, "Skipping malformed record");
                        }
                    }
                    None => input_open = false,
                },
            }
        }

        debug!(
            partition = self.partition,
            active_keys = self.active_keys.len(),
            writes_in_flight = self.writes_in_flight,
            "Input closed, draining key sequencer"
        );
        self.drain().await?;

        info!(
            partition = self.partition,
            candidates = self.stats.candidates,
            changes_emitted = self.stats.changes_emitted,
            "Key sequencer finished"
        );
        Ok(self.stats)
    }

    fn issue_read(&mut self, key: RecordKey, candidate: Record) {
        let read = self.backend.read_value(&key);
        self.stats.reads_issued += 1;
        let issued_at = Instant::now();

        self.in_flight.push(
            async move {
                let result = read.await;
                Completion::Read {
                    key,
                    candidate,
                    issued_at,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn issue_write(&mut self, key: RecordKey, value: Record) {
        let write = self.backend.write_value(&key, value);
        self.stats.writes_issued += 1;
        self.writes_in_flight += 1;
        self.metrics
            .gauge(WRITES_IN_FLIGHT_GAUGE)
            .set(self.writes_in_flight as f64);

        self.in_flight.push(
            async move {
                let result = write.await;
                Completion::Write { key, result }
            }
            .boxed(),
        );
    }

    async fn apply_completion(&mut self, completion: Completion) -> Result<(), DeduplicationError> {
        match completion {
            Completion::Read {
                key,
                candidate,
                issued_at,
                result,
            } => {
                let previous =
                    result.map_err(|e| self.state_failure(key.clone(), StateOperation::Read, e))?;
                self.metrics
                    .histogram(STATE_READ_DURATION_HISTOGRAM)
                    .record(issued_at.elapsed().as_secs_f64() * 1000.0);

                self.decide_and_emit(&key, previous, candidate).await?;
                self.advance_key(key);
                Ok(())
            }
            Completion::Write { key, result } => {
                self.writes_in_flight = self.writes_in_flight.saturating_sub(1);
                self.metrics
                    .gauge(WRITES_IN_FLIGHT_GAUGE)
                    .set(self.writes_in_flight as f64);
                result.map_err(|e| self.state_failure(key, StateOperation::Write, e))?;
                self.stats.writes_completed += 1;
                Ok(())
            }
        }
    }

    async fn decide_and_emit(
        &mut self,
        key: &RecordKey,
        previous: Option<Record>,
        candidate: Record,
    ) -> Result<(), DeduplicationError> {
        let step = match deduplicate_on_row_time(previous.as_ref(), candidate, &self.policy) {
            Ok(step) => step,
            Err(e) if !e.is_fatal() => {
                warn!(partition = self.partition, key = %key, error = ?e, "Skipping malformed record");
                self.stats.malformed += 1;
                self.metrics.counter(MALFORMED_RECORDS_COUNTER).increment(1);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        debug!(
            partition = self.partition,
            key = %key,
            outcome = %step.outcome,
            changes = step.changes.len(),
            "Deduplication decision"
        );
        self.record_outcome(step.outcome);

        // The write is issued before anything is emitted so that the next
        // read for this key is ordered after it.
        if let Some(retained) = step.retained {
            self.issue_write(key.clone(), retained);
        }

        for change in step.changes {
            let kind = change.kind;
            self.sink.collect(change).await?;
            self.stats.changes_emitted += 1;
            self.metrics
                .counter(CHANGELOG_RECORDS_EMITTED_COUNTER)
                .with_label("kind", kind.metric_label())
                .increment(1);
        }
        Ok(())
    }

    fn advance_key(&mut self, key: RecordKey) {
        let next = self
            .active_keys
            .get_mut(&key)
            .and_then(|parked| parked.pop_front());

        match next {
            Some(candidate) => {
                self.parked_now = self.parked_now.saturating_sub(1);
                self.metrics
                    .gauge(PARKED_CANDIDATES_GAUGE)
                    .set(self.parked_now as f64);
                self.issue_read(key, candidate);
            }
            None => {
                self.active_keys.remove(&key);
                self.metrics
                    .gauge(ACTIVE_KEYS_GAUGE)
                    .set(self.active_keys.len() as f64);
            }
        }
    }

    fn record_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::AcceptFirst => self.stats.accepted_first += 1,
            Outcome::AcceptReplace => self.stats.replaced += 1,
            Outcome::Reject => self.stats.rejected += 1,
        }
        self.metrics
            .counter(DEDUPLICATION_OUTCOME_COUNTER)
            .with_label("outcome", outcome.metric_label())
            .increment(1);
    }

    fn state_failure(
        &self,
        key: RecordKey,
        operation: StateOperation,
        source: anyhow::Error,
    ) -> DeduplicationError {
        error!(
            partition = self.partition,
            key = %key,
            %operation,
            error = ?source,
            "State access failed"
        );
        self.metrics
            .counter(STATE_ACCESS_ERRORS_COUNTER)
            .with_label("operation", &operation.to_string())
            .increment(1);
        DeduplicationError::state_access(key, operation, source)
    }
}
