//! Deduplication logic, independent of how state is stored.
//!
//! # Architecture
//!
//! A candidate flows through two pure stages:
//!
//! 1. The decision engine ([`decision`]) compares the candidate's event time
//!    with the retained record of its key and yields an [`Outcome`].
//! 2. The changelog emitter ([`changelog`]) turns that outcome into tagged
//!    output records.
//!
//! [`row_time`] composes both into a single step and offers a synchronous
//! driver. The asynchronous driver lives in [`crate::sequencer`].
//!
//! # Module Structure
//!
//! ```text
//! pipelines/
//! ├── traits.rs     # DeduplicationKeyExtractor
//! ├── keys.rs       # Key selection by field position
//! ├── policy.rs     # DeduplicationPolicy
//! ├── decision.rs   # Outcome and decide()
//! ├── changelog.rs  # emit()
//! └── row_time.rs   # deduplicate_on_row_time() and RowTimeDeduplicator
//! ```

pub mod changelog;
pub mod decision;
pub mod keys;
pub mod policy;
pub mod row_time;
pub mod traits;

pub use decision::{decide, decide_on_event_time, Outcome};
pub use keys::KeySelector;
pub use policy::DeduplicationPolicy;
pub use row_time::{deduplicate_on_row_time, DeduplicationStep, RowTimeDeduplicator};
pub use traits::DeduplicationKeyExtractor;
