//! Output side of the deduplicator.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::record::ChangelogRecord;

/// Receives changelog records in emission order.
///
/// The sequencer never reorders records for one key between the emitter and
/// the sink. An error from the sink is fatal to the partition.
#[async_trait]
pub trait ChangelogSink: Send {
    async fn collect(&mut self, change: ChangelogRecord) -> Result<()>;
}

/// Buffers everything in memory, mostly for tests and embedding.
#[async_trait]
impl ChangelogSink for Vec<ChangelogRecord> {
    async fn collect(&mut self, change: ChangelogRecord) -> Result<()> {
        self.push(change);
        Ok(())
    }
}

/// Forwards to a bounded channel, applying backpressure from the consumer.
#[async_trait]
impl ChangelogSink for mpsc::Sender<ChangelogRecord> {
    async fn collect(&mut self, change: ChangelogRecord) -> Result<()> {
        self.send(change)
            .await
            .map_err(|_| anyhow!("changelog receiver dropped"))
    }
}
