//! Keyed state access for the sequencer.
//!
//! A [`StateBackend`] holds at most one retained [`Record`] per key. Both
//! operations are asynchronous: calling them issues the operation, and the
//! returned future resolves once it has completed in the background.
//!
//! # Ordering contract
//!
//! Operations on the same key take effect in the order they were *issued*,
//! which is the moment the method is called, not the first poll of the
//! returned future. A read issued after a write therefore observes that
//! write even while the write's future is still pending. Operations on
//! different keys carry no ordering guarantee.

pub mod memory;

use futures::future::BoxFuture;

use crate::record::{Record, RecordKey};

pub use memory::{InMemoryStateBackend, StateGate};

/// Future returned by a state operation.
pub type StateFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

pub trait StateBackend: Send + Sync {
    /// Issue a read of the retained value for `key`.
    fn read_value(&self, key: &RecordKey) -> StateFuture<Option<Record>>;

    /// Issue a write replacing the retained value for `key`.
    fn write_value(&self, key: &RecordKey, value: Record) -> StateFuture<()>;
}
