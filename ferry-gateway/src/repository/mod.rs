//! Repository Module
//!
//! Data access layer for the gateway.
//! Each repository handles database operations for a specific table group.

pub mod cdn;
pub mod item;
pub mod lock;
pub mod publish;
pub mod task;

// Re-export for convenience
pub use cdn as cdn_repository;
pub use item as item_repository;
pub use lock as lock_repository;
pub use publish as publish_repository;
pub use task as task_repository;
