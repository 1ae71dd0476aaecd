//! Data Transfer Objects
//!
//! Request bodies accepted by the gateway API. Responses reuse the domain
//! types directly.

pub mod publish;
pub mod task;
