//! Provost persistence — SurrealDB connection management, schema and
//! repository implementations.
//!
//! This crate provides:
//! - Connection management ([`DbManager`], [`DbConfig`])
//! - Schema initialization and migrations ([`run_migrations`])
//! - Repository implementations for the `provost-core` traits
//! - The database-backed Single-Flight Mutex ([`AdvisoryLock`])

mod connection;
mod error;
mod lock;
pub mod repository;
mod schema;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use lock::{AdvisoryLock, LockGuard, UPDATE_LOCK_ID};
pub use repository::{SurrealTenantRepository, SurrealUpdateRepository};
pub use schema::run_migrations;
