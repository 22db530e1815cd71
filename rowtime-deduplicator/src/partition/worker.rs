//! Partition Worker - Dedicated task running the key sequencer of one partition
//!
//! Each partition gets its own worker with a bounded channel, ensuring:
//! 1. Ordering is preserved within each partition
//! 2. Parallelism is achieved across partitions
//! 3. Backpressure is applied when processing falls behind

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::DeduplicationError;
use crate::record::KeyedRecord;
use crate::sequencer::{
    KeySequencer, SequencerStats, DEFAULT_MAX_ACTIVE_KEYS, DEFAULT_MAX_PARKED_CANDIDATES,
};
use crate::sink::ChangelogSink;
use crate::utils::async_helpers::unwrap_worker_task;

/// Configuration for partition workers
#[derive(Debug, Clone)]
pub struct PartitionWorkerConfig {
    /// Size of the channel buffer per partition
    pub channel_buffer_size: usize,
    /// Keys a worker processes concurrently before it stops pulling input
    pub max_active_keys: usize,
    /// Candidates a worker holds parked behind active keys before it stops
    /// pulling input
    pub max_parked_candidates: usize,
}

impl Default for PartitionWorkerConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 1000,
            max_active_keys: DEFAULT_MAX_ACTIVE_KEYS,
            max_parked_candidates: DEFAULT_MAX_PARKED_CANDIDATES,
        }
    }
}

/// A worker that deduplicates the records of a single partition
pub struct PartitionWorker {
    partition: u32,
    sender: mpsc::Sender<KeyedRecord>,
    handle: JoinHandle<Result<SequencerStats, DeduplicationError>>,
}

impl PartitionWorker {
    /// Spawn the worker task for `sequencer`
    pub fn spawn<S>(
        partition: u32,
        sequencer: KeySequencer<S>,
        config: &PartitionWorkerConfig,
    ) -> Self
    where
        S: ChangelogSink + 'static,
    {
        let (sender, receiver) = mpsc::channel(config.channel_buffer_size.max(1));
        let sequencer = sequencer
            .with_partition(partition)
            .with_max_active_keys(config.max_active_keys)
            .with_max_parked_candidates(config.max_parked_candidates);

        let handle = tokio::spawn(async move {
            let result = sequencer.run(receiver).await;
            if let Err(e) = &result {
                error!(partition, error = ?e, "Partition worker stopped");
            }
            result
        });

        Self {
            partition,
            sender,
            handle,
        }
    }

    /// Send a record to this worker.
    ///
    /// Awaits until the channel has capacity. Fails only once the worker has
    /// stopped, in which case its error is reported by [`Self::shutdown`].
    pub async fn send(
        &self,
        record: KeyedRecord,
    ) -> Result<(), mpsc::error::SendError<KeyedRecord>> {
        self.sender.send(record).await
    }

    /// Get the partition this worker handles
    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Shutdown the worker gracefully
    ///
    /// Closes the input, waits until queued records are processed and
    /// issued writes have completed, and returns the worker's statistics.
    pub async fn shutdown(self) -> Result<SequencerStats> {
        // Drop the sender to signal the worker to stop
        drop(self.sender);

        let partition = self.partition;
        let stats = unwrap_worker_task(
            self.handle,
            &format!("Partition worker {partition} panicked"),
        )
        .await?;

        info!(
            partition,
            candidates = stats.candidates,
            "Partition worker shut down gracefully"
        );
        Ok(stats)
    }
}
