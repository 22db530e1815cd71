//! In-memory [`StateBackend`] with controllable timing.
//!
//! Every operation takes effect on the *visible* view at issue time, which
//! gives per-key read-your-writes ordering. A write reaches the *durable*
//! view only when its future completes, so tests can tell apart "issued"
//! and "completed". Latency, failures and read or write gates can be
//! injected to make completions arrive late or out of order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::debug;

use crate::error::StateOperation;
use crate::record::{Record, RecordKey};
use crate::store::{StateBackend, StateFuture};

#[derive(Debug, Default)]
struct StateMaps {
    visible: HashMap<RecordKey, Record>,
    /// Completed writes, tagged with their issue sequence number
    durable: HashMap<RecordKey, (u64, Record)>,
    write_sequence: u64,
    read_latency_overrides: HashMap<RecordKey, Duration>,
    failing_reads: HashSet<RecordKey>,
    failing_writes: HashSet<RecordKey>,
}

#[derive(Debug)]
struct Shared {
    maps: Mutex<StateMaps>,
    reads_open: watch::Sender<bool>,
    writes_open: watch::Sender<bool>,
    reads_issued: AtomicU64,
    writes_issued: AtomicU64,
    writes_completed: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StateMaps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self, operation: StateOperation) -> &watch::Sender<bool> {
        match operation {
            StateOperation::Read => &self.reads_open,
            StateOperation::Write => &self.writes_open,
        }
    }
}

/// Shared, cloneable in-memory state. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct InMemoryStateBackend {
    shared: Arc<Shared>,
    read_latency: Duration,
    write_latency: Duration,
}

impl Default for InMemoryStateBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateBackend {
    pub fn new() -> Self {
        let (reads_open, _) = watch::channel(true);
        let (writes_open, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                maps: Mutex::new(StateMaps::default()),
                reads_open,
                writes_open,
                reads_issued: AtomicU64::new(0),
                writes_issued: AtomicU64::new(0),
                writes_completed: AtomicU64::new(0),
            }),
            read_latency: Duration::ZERO,
            write_latency: Duration::ZERO,
        }
    }

    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// Overrides the read latency for a single key.
    pub fn set_read_latency_for(&self, key: &RecordKey, latency: Duration) {
        self.shared
            .lock()
            .read_latency_overrides
            .insert(key.clone(), latency);
    }

    /// Makes every read issued for `key` from now on fail.
    pub fn fail_reads_for(&self, key: &RecordKey) {
        self.shared.lock().failing_reads.insert(key.clone());
    }

    /// Makes every write issued for `key` from now on fail.
    pub fn fail_writes_for(&self, key: &RecordKey) {
        self.shared.lock().failing_writes.insert(key.clone());
    }

    /// Holds all write completions until the returned gate is released or
    /// dropped. Writes still take effect on the visible view when issued.
    pub fn hold_writes(&self) -> StateGate {
        self.hold(StateOperation::Write)
    }

    /// Holds all read completions until the returned gate is released or
    /// dropped. Reads still snapshot the visible view when issued.
    pub fn hold_reads(&self) -> StateGate {
        self.hold(StateOperation::Read)
    }

    fn hold(&self, operation: StateOperation) -> StateGate {
        self.shared.gate(operation).send_replace(false);
        StateGate {
            shared: Arc::clone(&self.shared),
            operation,
        }
    }

    /// Seeds a retained value as if it had been written and completed.
    pub fn insert(&self, key: RecordKey, value: Record) {
        let mut maps = self.shared.lock();
        maps.write_sequence += 1;
        let sequence = maps.write_sequence;
        maps.visible.insert(key.clone(), value.clone());
        maps.durable.insert(key, (sequence, value));
    }

    /// Value a read issued now would observe.
    pub fn visible_value(&self, key: &RecordKey) -> Option<Record> {
        self.shared.lock().visible.get(key).cloned()
    }

    /// Value of the most recently issued write that has completed.
    pub fn durable_value(&self, key: &RecordKey) -> Option<Record> {
        self.shared
            .lock()
            .durable
            .get(key)
            .map(|(_, value)| value.clone())
    }

    pub fn key_count(&self) -> usize {
        self.shared.lock().visible.len()
    }

    pub fn reads_issued(&self) -> u64 {
        self.shared.reads_issued.load(Ordering::SeqCst)
    }

    pub fn writes_issued(&self) -> u64 {
        self.shared.writes_issued.load(Ordering::SeqCst)
    }

    pub fn writes_completed(&self) -> u64 {
        self.shared.writes_completed.load(Ordering::SeqCst)
    }
}

impl StateBackend for InMemoryStateBackend {
    fn read_value(&self, key: &RecordKey) -> StateFuture<Option<Record>> {
        self.shared.reads_issued.fetch_add(1, Ordering::SeqCst);
        let (snapshot, latency, fail) = {
            let maps = self.shared.lock();
            (
                maps.visible.get(key).cloned(),
                maps.read_latency_overrides
                    .get(key)
                    .copied()
                    .unwrap_or(self.read_latency),
                maps.failing_reads.contains(key),
            )
        };
        let mut gate = self.shared.reads_open.subscribe();
        let key = key.clone();

        async move {
            wait_until_open(&mut gate).await;
            pause(latency).await;
            if fail {
                return Err(anyhow!("injected read failure for key {key}"));
            }
            Ok(snapshot)
        }
        .boxed()
    }

    fn write_value(&self, key: &RecordKey, value: Record) -> StateFuture<()> {
        self.shared.writes_issued.fetch_add(1, Ordering::SeqCst);
        let (sequence, fail) = {
            let mut maps = self.shared.lock();
            maps.write_sequence += 1;
            maps.visible.insert(key.clone(), value.clone());
            (maps.write_sequence, maps.failing_writes.contains(key))
        };
        let shared = Arc::clone(&self.shared);
        let mut gate = shared.writes_open.subscribe();
        let latency = self.write_latency;
        let key = key.clone();

        async move {
            wait_until_open(&mut gate).await;
            pause(latency).await;
            if fail {
                return Err(anyhow!("injected write failure for key {key}"));
            }

            {
                let mut maps = shared.lock();
                let is_newer = match maps.durable.get(&key) {
                    Some((completed, _)) => *completed < sequence,
                    None => true,
                };
                if is_newer {
                    maps.durable.insert(key, (sequence, value));
                } else {
                    debug!(sequence, "Write completed after a newer write for the same key");
                }
            }
            shared.writes_completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }
}

/// Keeps completions of one kind of operation pending while alive.
#[must_use = "operations are released as soon as the gate is dropped"]
pub struct StateGate {
    shared: Arc<Shared>,
    operation: StateOperation,
}

impl StateGate {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for StateGate {
    fn drop(&mut self) {
        self.shared.gate(self.operation).send_replace(true);
    }
}

async fn wait_until_open(gate: &mut watch::Receiver<bool>) {
    loop {
        let open = *gate.borrow_and_update();
        if open || gate.changed().await.is_err() {
            return;
        }
    }
}

async fn pause(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}
