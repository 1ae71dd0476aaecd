//! Ferry Core
//!
//! Core types for the Ferry content-publishing gateway.
//!
//! This crate contains:
//! - Domain types: publishes, items, commit tasks and CDN table entries
//! - DTOs: request bodies accepted by the gateway API
//! - Validation: item normalization and policy checks applied before staging

pub mod domain;
pub mod dto;
pub mod validation;
