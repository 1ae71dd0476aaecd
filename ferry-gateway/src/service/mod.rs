//! Service Module
//!
//! Business logic behind the HTTP API. Services validate requests and call
//! into the store; they never talk to the CDN directly.

pub mod publish;
pub mod task;

// Re-export for convenience
pub use publish as publish_service;
pub use task as task_service;
