//! Routes records to partition workers by key hash.
//!
//! All records of one key land on the same worker, so per-key ordering only
//! has to hold within a worker. Keys are never shared across partitions.

use std::hash::Hasher;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use siphasher::sip::SipHasher13;
use tracing::{info, warn};

use crate::error::DeduplicationError;
use crate::pipelines::{DeduplicationKeyExtractor, DeduplicationPolicy};
use crate::record::{KeyedRecord, Record, RecordKey};
use crate::sequencer::{KeySequencer, SequencerStats};
use crate::sink::ChangelogSink;
use crate::store::StateBackend;

use super::worker::{PartitionWorker, PartitionWorkerConfig};

pub struct PartitionRouter<K: DeduplicationKeyExtractor> {
    extractor: K,
    workers: Vec<PartitionWorker>,
}

impl<K: DeduplicationKeyExtractor> PartitionRouter<K> {
    /// Spawn `partition_count` workers sharing `backend`.
    ///
    /// `make_sink` is called once per partition to build that worker's sink.
    /// The policy is checked against `field_count` before any worker starts.
    pub fn spawn<S, F>(
        partition_count: u32,
        policy: DeduplicationPolicy,
        field_count: usize,
        backend: Arc<dyn StateBackend>,
        extractor: K,
        worker_config: &PartitionWorkerConfig,
        mut make_sink: F,
    ) -> Result<Self, DeduplicationError>
    where
        S: ChangelogSink + 'static,
        F: FnMut(u32) -> S,
    {
        if partition_count == 0 {
            return Err(DeduplicationError::configuration(
                "partition count must be at least 1",
            ));
        }

        let sequencers = (0..partition_count)
            .map(|partition| {
                KeySequencer::new(
                    policy,
                    field_count,
                    Arc::clone(&backend),
                    make_sink(partition),
                )
                .map(|sequencer| (partition, sequencer))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let workers = sequencers
            .into_iter()
            .map(|(partition, sequencer)| {
                PartitionWorker::spawn(partition, sequencer, worker_config)
            })
            .collect();

        info!(partition_count, "Spawned partition workers");
        Ok(Self { extractor, workers })
    }

    pub fn partition_count(&self) -> u32 {
        u32::try_from(self.workers.len()).unwrap_or(u32::MAX)
    }

    /// Partition owning `key`.
    pub fn partition_for(&self, key: &RecordKey) -> u32 {
        let mut hasher = SipHasher13::new();
        hasher.write(key.as_bytes());
        let count = u64::from(self.partition_count());
        // The remainder is below the partition count, so it fits in u32.
        u32::try_from(hasher.finish() % count).unwrap_or(0)
    }

    /// Extracts the key of `record` and hands the record to its worker.
    ///
    /// A record whose key cannot be extracted yields a non-fatal
    /// [`DeduplicationError::MalformedRecord`]. A worker that already
    /// stopped yields a fatal error; its cause is reported by
    /// [`Self::shutdown`].
    pub async fn route(&self, record: Record) -> Result<(), DeduplicationError> {
        let key = self.extractor.extract_dedup_key(&record)?;
        let partition = self.partition_for(&key);
        let worker = self
            .workers
            .get(usize::try_from(partition).unwrap_or(usize::MAX))
            .ok_or_else(|| anyhow!("no worker for partition {partition}"))?;

        worker
            .send(KeyedRecord::new(key, record))
            .await
            .map_err(|_| anyhow!("partition worker {partition} is no longer running"))?;
        Ok(())
    }

    /// Shuts every worker down and merges their statistics.
    ///
    /// All workers are awaited even if one of them failed; the first failure
    /// is returned.
    pub async fn shutdown(self) -> Result<SequencerStats> {
        let mut total = SequencerStats::default();
        let mut first_error = None;

        for worker in self.workers {
            let partition = worker.partition();
            match worker.shutdown().await {
                Ok(stats) => total.merge(&stats),
                Err(e) => {
                    warn!(partition, error = ?e, "Partition worker failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::KeySelector;
    use crate::record::{ChangelogRecord, FieldValue};
    use crate::store::InMemoryStateBackend;
    use tokio::sync::mpsc;

    fn router(
        partition_count: u32,
        backend: &InMemoryStateBackend,
    ) -> (
        PartitionRouter<KeySelector>,
        mpsc::Receiver<ChangelogRecord>,
    ) {
        let (changes, output) = mpsc::channel(64);
        let router = PartitionRouter::spawn(
            partition_count,
            DeduplicationPolicy::keep_last_row(1),
            2,
            Arc::new(backend.clone()),
            KeySelector::new(vec![0], 2).unwrap(),
            &PartitionWorkerConfig::default(),
            |_| changes.clone(),
        )
        .unwrap();
        (router, output)
    }

    #[tokio::test]
    async fn test_partition_for_is_stable_and_in_range() {
        let backend = InMemoryStateBackend::new();
        let (router, _output) = router(4, &backend);

        for name in ["a", "b", "c", "d", "e", "f"] {
            let key = RecordKey::from_fields(&[FieldValue::from(name)]);
            let partition = router.partition_for(&key);
            assert!(partition < 4);
            assert_eq!(partition, router.partition_for(&key));
        }
        router.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_partitions_is_a_configuration_error() {
        let result = PartitionRouter::spawn(
            0,
            DeduplicationPolicy::keep_last_row(1),
            2,
            Arc::new(InMemoryStateBackend::new()),
            KeySelector::new(vec![0], 2).unwrap(),
            &PartitionWorkerConfig::default(),
            |_| Vec::<ChangelogRecord>::new(),
        );

        assert!(matches!(result, Err(DeduplicationError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_policy_outside_schema_fails_before_workers_start() {
        let result = PartitionRouter::spawn(
            2,
            DeduplicationPolicy::keep_last_row(7),
            3,
            Arc::new(InMemoryStateBackend::new()),
            KeySelector::new(vec![0], 3).unwrap(),
            &PartitionWorkerConfig::default(),
            |_| Vec::<ChangelogRecord>::new(),
        );

        let err = result.err().expect("spawn should reject the policy");
        assert!(matches!(err, DeduplicationError::Configuration(_)));
        assert!(err.to_string().contains("out of bounds"));
    }

    #[tokio::test]
    async fn test_route_rejects_record_without_key_field() {
        let backend = InMemoryStateBackend::new();
        let (router, _output) = router(2, &backend);

        let err = router.route(Record::new(vec![])).await.unwrap_err();

        assert!(!err.is_fatal());
        let stats = router.shutdown().await.unwrap();
        assert_eq!(stats.candidates, 0);
    }

    #[tokio::test]
    async fn test_route_and_shutdown_merge_stats() {
        let backend = InMemoryStateBackend::new();
        let (router, _output) = router(3, &backend);

        for (key, event_time) in [("a", 1), ("b", 1), ("a", 2), ("c", 1), ("b", 0)] {
            router
                .route(Record::new(vec![key.into(), FieldValue::Long(event_time)]))
                .await
                .unwrap();
        }
        let stats = router.shutdown().await.unwrap();

        assert_eq!(stats.candidates, 5);
        assert_eq!(stats.accepted_first, 3);
        assert_eq!(stats.replaced, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(backend.key_count(), 3);
    }
}
