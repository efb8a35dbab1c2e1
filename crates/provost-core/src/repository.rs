//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Implementations live in
//! `provost-db`; the engine and the scheduler are generic over these
//! traits so tests can run against the in-memory store.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::ProvostResult;
use crate::models::namespace::{EnvType, Namespace, DEFAULT_ENV_TYPES};
use crate::models::tenant::Tenant;
use crate::models::update::{TenantsUpdate, UpdateStatus};

/// Access to tenants and their namespaces.
pub trait TenantRepository: Send + Sync {
    fn create_tenant(&self, tenant: &Tenant) -> impl Future<Output = ProvostResult<()>> + Send;
    fn save_tenant(&self, tenant: &Tenant) -> impl Future<Output = ProvostResult<()>> + Send;
    fn delete_tenant(&self, id: Uuid) -> impl Future<Output = ProvostResult<()>> + Send;
    fn get_tenant(&self, id: Uuid) -> impl Future<Output = ProvostResult<Tenant>> + Send;
    fn exists(&self, id: Uuid) -> impl Future<Output = ProvostResult<bool>> + Send;
    fn exists_with_ns_base_name(
        &self,
        ns_base_name: &str,
    ) -> impl Future<Output = ProvostResult<bool>> + Send;

    /// Finds the tenant owning the namespace `name` on the given cluster.
    fn lookup_tenant_by_cluster_and_namespace(
        &self,
        cluster_url: &str,
        name: &str,
    ) -> impl Future<Output = ProvostResult<Tenant>> + Send;

    fn create_namespace(
        &self,
        namespace: &Namespace,
    ) -> impl Future<Output = ProvostResult<()>> + Send;
    fn save_namespace(
        &self,
        namespace: &Namespace,
    ) -> impl Future<Output = ProvostResult<()>> + Send;
    fn delete_namespace(
        &self,
        namespace: &Namespace,
    ) -> impl Future<Output = ProvostResult<()>> + Send;
    fn get_namespaces(
        &self,
        tenant_id: Uuid,
    ) -> impl Future<Output = ProvostResult<Vec<Namespace>>> + Send;
    fn namespace_exists(&self, name: &str) -> impl Future<Output = ProvostResult<bool>> + Send;

    /// Tenants having at least one namespace whose `(envType, version)`
    /// differs from `mapped_versions` or whose `updated_by` differs from
    /// the current revision, restricted to an optional cluster, in a
    /// deterministic order, at most `limit` rows.
    fn tenants_to_update(
        &self,
        mapped_versions: &BTreeMap<EnvType, String>,
        limit: usize,
        updated_by: &str,
        cluster_url: Option<&str>,
    ) -> impl Future<Output = ProvostResult<Vec<Tenant>>> + Send;

    fn outdated_tenant_count(
        &self,
        mapped_versions: &BTreeMap<EnvType, String>,
        updated_by: &str,
        cluster_url: Option<&str>,
    ) -> impl Future<Output = ProvostResult<u64>> + Send;

    /// Distinct cluster URLs across all outdated tenants.
    fn clusters_to_update(
        &self,
        mapped_versions: &BTreeMap<EnvType, String>,
        updated_by: &str,
    ) -> impl Future<Output = ProvostResult<Vec<String>>> + Send;
}

/// Access to the fleet-update singleton row. Every mutation is expected to
/// run under the Single-Flight Mutex so that scheduling decisions stay
/// serialized across service instances.
pub trait UpdateRepository: Send + Sync {
    /// Reads the singleton, creating the default row on first access.
    fn get_tenants_update(&self) -> impl Future<Output = ProvostResult<TenantsUpdate>> + Send;
    fn save_tenants_update(
        &self,
        update: &TenantsUpdate,
    ) -> impl Future<Output = ProvostResult<()>> + Send;
    fn update_status(
        &self,
        status: UpdateStatus,
    ) -> impl Future<Output = ProvostResult<()>> + Send;
    /// Operator kill switch: flips the status to `killed`.
    fn stop(&self) -> impl Future<Output = ProvostResult<()>> + Send;
    /// Transitions the row to `updating` and stamps `last_time_updated`.
    fn prepare_for_updating(&self) -> impl Future<Output = ProvostResult<()>> + Send;
}

/// Process-wide advisory lock — the Single-Flight Mutex guaranteeing one
/// scheduler instance fleet-wide. `lock` waits up to `timeout` and
/// reports `Busy` on contention.
pub trait AdvisoryMutex: Send + Sync {
    type Guard: Send;

    fn lock(
        &self,
        id: &str,
        timeout: std::time::Duration,
    ) -> impl Future<Output = ProvostResult<Self::Guard>> + Send;

    fn release(&self, guard: Self::Guard) -> impl Future<Output = ProvostResult<()>> + Send;
}

/// Picks a free namespace base name for a user: the sanitized username
/// itself, or the first `username{n}` (n = 2, 3, …) that collides with no
/// existing tenant base name and no namespace named either `candidate` or
/// `candidate-{envType}`.
pub async fn construct_ns_base_name<R: TenantRepository>(
    repo: &R,
    username: &str,
) -> ProvostResult<String> {
    let mut candidate = username.to_string();
    let mut suffix = 1u32;
    loop {
        if !base_name_is_taken(repo, &candidate).await? {
            return Ok(candidate);
        }
        suffix += 1;
        candidate = format!("{username}{suffix}");
    }
}

async fn base_name_is_taken<R: TenantRepository>(
    repo: &R,
    candidate: &str,
) -> ProvostResult<bool> {
    if repo.exists_with_ns_base_name(candidate).await? {
        return Ok(true);
    }
    for env_type in DEFAULT_ENV_TYPES {
        if repo
            .namespace_exists(&env_type.namespace_name(candidate))
            .await?
        {
            return Ok(true);
        }
    }
    Ok(false)
}
