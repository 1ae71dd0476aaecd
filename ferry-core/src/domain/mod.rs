//! Core domain types
//!
//! These types represent the entities the gateway persists (publishes, items,
//! tasks) and the records it writes to the CDN-facing table. They carry no
//! persistence or execution logic; that lives in the gateway crate.

pub mod cdn;
pub mod item;
pub mod publish;
pub mod task;
