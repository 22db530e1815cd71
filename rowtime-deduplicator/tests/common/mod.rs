//! Shared helpers for the integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rowtime_deduplicator::pipelines::RowTimeDeduplicator;
use rowtime_deduplicator::store::{StateBackend, StateFuture};
use rowtime_deduplicator::test_utils::keyed_record;
use rowtime_deduplicator::{
    ChangeKind, ChangelogRecord, DeduplicationPolicy, FieldValue, InMemoryStateBackend,
    KeySequencer, KeyedRecord, Record, RecordKey, SequencerStats,
};

/// Event-time field of the `[key, event_time, payload]` layout.
pub const EVENT_TIME_INDEX: usize = 1;

/// Width of the `[key, event_time, payload]` layout.
pub const FIELD_COUNT: usize = 3;

/// Builds keyed records from `(key, event_time)` pairs, with the input
/// position as payload.
pub fn keyed_records(input: &[(&str, i64)]) -> Vec<KeyedRecord> {
    input
        .iter()
        .enumerate()
        .map(|(position, (key, event_time))| {
            keyed_record(key, *event_time, &format!("p{position}"))
        })
        .collect()
}

/// Submits every record, then drains the sequencer.
pub async fn run_sequencer(
    policy: DeduplicationPolicy,
    backend: Arc<dyn StateBackend>,
    records: Vec<KeyedRecord>,
) -> (Vec<ChangelogRecord>, SequencerStats) {
    let mut sequencer = KeySequencer::new(
        policy,
        FIELD_COUNT,
        backend,
        Vec::<ChangelogRecord>::new(),
    )
    .expect("policy should fit the record layout");
    for KeyedRecord { key, record } in records {
        sequencer
            .submit(key, record)
            .expect("candidate should be well formed");
    }
    sequencer.drain().await.expect("sequencer should drain");
    let stats = *sequencer.stats();
    (sequencer.into_sink(), stats)
}

/// Feeds the records through the synchronous deduplicator.
pub fn run_reference(
    policy: DeduplicationPolicy,
    records: Vec<KeyedRecord>,
) -> (Vec<ChangelogRecord>, RowTimeDeduplicator) {
    let mut dedup = RowTimeDeduplicator::new(policy);
    let mut changes = Vec::new();
    for KeyedRecord { key, record } in records {
        changes.extend(dedup.process(key, record).expect("reference should accept"));
    }
    (changes, dedup)
}

pub fn key_name(record: &Record) -> String {
    match record.field(0) {
        Some(FieldValue::String(name)) => name.clone(),
        other => panic!("unexpected key field {other:?}"),
    }
}

pub fn event_time(record: &Record) -> i64 {
    record
        .event_time(EVENT_TIME_INDEX)
        .expect("record should carry an event time")
}

/// `(kind, event_time)` pairs, the shape most assertions care about.
pub fn summarize(changes: &[ChangelogRecord]) -> Vec<(ChangeKind, i64)> {
    changes
        .iter()
        .map(|change| (change.kind, event_time(&change.record)))
        .collect()
}

/// Splits a changelog into per-key subsequences, preserving order.
pub fn split_by_key(changes: &[ChangelogRecord]) -> HashMap<String, Vec<ChangelogRecord>> {
    let mut by_key: HashMap<String, Vec<ChangelogRecord>> = HashMap::new();
    for change in changes {
        by_key
            .entry(key_name(&change.record))
            .or_default()
            .push(change.clone());
    }
    by_key
}

/// A state operation as observed at issue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOp {
    Read(RecordKey),
    Write(RecordKey, i64),
}

/// Records the issue order of every operation before delegating to an
/// in-memory backend.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    pub inner: InMemoryStateBackend,
    log: Arc<Mutex<Vec<StateOp>>>,
}

impl RecordingBackend {
    pub fn new(inner: InMemoryStateBackend) -> Self {
        Self {
            inner,
            log: Arc::default(),
        }
    }

    pub fn operations(&self) -> Vec<StateOp> {
        self.log.lock().unwrap().clone()
    }

    /// Operations issued for `key`, in issue order.
    pub fn operations_for(&self, key: &RecordKey) -> Vec<StateOp> {
        self.operations()
            .into_iter()
            .filter(|op| match op {
                StateOp::Read(k) | StateOp::Write(k, _) => k == key,
            })
            .collect()
    }
}

impl StateBackend for RecordingBackend {
    fn read_value(&self, key: &RecordKey) -> StateFuture<Option<Record>> {
        self.log.lock().unwrap().push(StateOp::Read(key.clone()));
        self.inner.read_value(key)
    }

    fn write_value(&self, key: &RecordKey, value: Record) -> StateFuture<()> {
        self.log
            .lock()
            .unwrap()
            .push(StateOp::Write(key.clone(), event_time(&value)));
        self.inner.write_value(key, value)
    }
}
