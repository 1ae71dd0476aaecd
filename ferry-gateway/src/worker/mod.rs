//! Commit pipeline
//!
//! - [`writer`]: chunk writes to the CDN table
//! - [`commit`]: the publish state machine run by one task
//! - [`invalidator`]: cache purge after a successful commit
//! - [`executor`]: the worker pool draining the task ledger

pub mod backoff;
pub mod commit;
pub mod executor;
pub mod invalidator;
pub mod writer;

pub use backoff::Backoff;
pub use commit::{CommitConfig, CommitOrchestrator, CommitOutcome};
pub use executor::{ExecutorConfig, TaskExecutor};
pub use invalidator::Invalidator;
pub use writer::TableWriter;
