//! Core domain types for the provost tenant service.
//!
//! This crate has no I/O: it defines the entities persisted by
//! `provost-db` (tenants, namespaces, the fleet-update singleton), the raw
//! [`object`] view over template-rendered cluster resources together with
//! the canonical Kind ordering, and the async repository traits the rest of
//! the workspace is written against.

pub mod error;
pub mod models;
pub mod object;
pub mod repository;

pub use error::{ProvostError, ProvostResult};
