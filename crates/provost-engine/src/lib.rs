//! The tenant provisioning engine.
//!
//! Turns a high-level request — create, update, delete or clean a tenant,
//! or roll a fleet-wide template upgrade — into an orchestrated,
//! partially-concurrent sequence of cluster calls with per-namespace
//! state transitions persisted through the repository traits.
//!
//! - [`config`] — process-wide engine configuration
//! - [`env_service`] — per-(tenant, envType) resolution of cluster,
//!   namespace name, templates and objects
//! - [`action`] — the four namespace actions and their operation sets
//! - [`service`] — the concurrent apply loop and the healing strategies
//! - [`update`] — the fleet-wide rolling update scheduler
//! - [`retry`] — bounded retry helper

pub mod action;
pub mod config;
pub mod env_service;
pub mod retry;
pub mod service;
pub mod update;

pub use action::{ActionOptions, DeleteOptions};
pub use config::EngineConfig;
pub use env_service::{EnvironmentTypeService, ServiceContext};
pub use service::ProvisioningService;
pub use update::{
    EngineUpdateExecutor, TenantsUpdater, UpdateExecutor, UpdateFilter, UpdateStatusInfo,
};
