//! Domain models.

pub mod cluster;
pub mod namespace;
pub mod tenant;
pub mod update;

pub use cluster::{Cluster, ClusterMapping};
pub use namespace::{missing_env_types, EnvType, Namespace, NamespaceState, DEFAULT_ENV_TYPES};
pub use tenant::{sanitize_username, Tenant};
pub use update::{TenantsUpdate, UpdateStatus};
