//! The fleet-wide rolling update scheduler.
//!
//! On demand the scheduler walks all outdated tenants in bounded batches
//! and drives Update actions cluster-wide. The `TenantsUpdate` singleton
//! row carries its status; the Single-Flight Mutex serializes every
//! status transition so at most one scheduler run is active fleet-wide.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use provost_core::models::{
    Cluster, ClusterMapping, EnvType, Tenant, UpdateStatus, DEFAULT_ENV_TYPES,
};
use provost_core::repository::{AdvisoryMutex, TenantRepository, UpdateRepository};
use provost_core::{ProvostError, ProvostResult};
use provost_cluster::token::TokenProducer;
use provost_template::{mapped_versions, version_managers, TemplateLoader};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::action::ActionOptions;
use crate::config::EngineConfig;
use crate::env_service::ServiceContext;
use crate::retry::with_retries;
use crate::service::ProvisioningService;

/// Lock id serializing all fleet-update scheduling decisions.
const UPDATE_LOCK_ID: &str = "tenants-update";

/// How often a failing per-tenant update is attempted within one run.
const UPDATE_ATTEMPTS: u32 = 2;

/// Optional narrowing of a scheduler run.
#[derive(Debug, Clone, Default)]
pub struct UpdateFilter {
    /// Only tenants with namespaces on this cluster.
    pub cluster_url: Option<String>,
    /// Only this environment type per tenant.
    pub env_type: Option<EnvType>,
}

impl UpdateFilter {
    fn env_types(&self) -> Vec<EnvType> {
        match self.env_type {
            Some(env_type) => vec![env_type],
            None => DEFAULT_ENV_TYPES.to_vec(),
        }
    }
}

/// What `show` reports to the admin surface.
#[derive(Debug, Clone)]
pub struct UpdateStatusInfo {
    pub status: UpdateStatus,
    pub failed_count: u32,
    pub last_time_updated: chrono::DateTime<Utc>,
    /// Configured version per template file.
    pub file_versions: Vec<(String, String)>,
    /// Tenants still outdated under the given filter.
    pub to_update: u64,
}

/// Runs the Update action for one tenant. Abstracted so the scheduler
/// can be exercised without a cluster.
pub trait UpdateExecutor: Send + Sync {
    fn update(
        &self,
        tenant: &Tenant,
        env_types: &[EnvType],
    ) -> impl Future<Output = ProvostResult<()>> + Send;
}

/// The singleton coordinator for fleet-wide template upgrades.
pub struct TenantsUpdater<R, U, M, E> {
    tenant_repo: R,
    update_repo: U,
    mutex: M,
    executor: Arc<E>,
    config: Arc<EngineConfig>,
}

impl<R, U, M, E> TenantsUpdater<R, U, M, E>
where
    R: TenantRepository,
    U: UpdateRepository,
    M: AdvisoryMutex,
    E: UpdateExecutor + 'static,
{
    pub fn new(
        tenant_repo: R,
        update_repo: U,
        mutex: M,
        executor: Arc<E>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            tenant_repo,
            update_repo,
            mutex,
            executor,
            config,
        }
    }

    /// Runs one full update pass. Returns `Conflict` without touching
    /// anything when another scheduler owns the singleton.
    pub async fn start(&self, filter: UpdateFilter) -> ProvostResult<()> {
        self.try_begin().await?;
        info!(?filter, "starting the fleet update");
        let outcome = self.update_loop(&filter).await;
        self.finish(&outcome).await?;
        outcome.map(|_| ())
    }

    /// Operator kill switch; honored between batches.
    pub async fn stop(&self) -> ProvostResult<()> {
        self.update_repo.stop().await
    }

    /// Status inspection for the admin surface.
    pub async fn show(&self, filter: &UpdateFilter) -> ProvostResult<UpdateStatusInfo> {
        let update = self.update_repo.get_tenants_update().await?;
        let mapped = mapped_versions(&self.config.template_versions);
        let to_update = self
            .tenant_repo
            .outdated_tenant_count(&mapped, &self.config.commit, filter.cluster_url.as_deref())
            .await?;
        let file_versions = version_managers(&self.config.template_versions)
            .into_iter()
            .map(|vm| (vm.file_name.to_string(), vm.version))
            .collect();
        Ok(UpdateStatusInfo {
            status: update.status,
            failed_count: update.failed_count,
            last_time_updated: update.last_time_updated,
            file_versions,
            to_update,
        })
    }

    /// Transitions the singleton to `updating` under the mutex. A row
    /// already `updating` is rejected unless it is older than the stuck
    /// timeout, in which case it is assumed stale and taken over.
    async fn try_begin(&self) -> ProvostResult<()> {
        let guard = self
            .mutex
            .lock(UPDATE_LOCK_ID, self.config.lock_timeout)
            .await
            .map_err(|e| match e {
                ProvostError::Busy(_) => {
                    ProvostError::Conflict("another instance is scheduling an update".into())
                }
                other => other,
            })?;

        let decision = async {
            let update = self.update_repo.get_tenants_update().await?;
            if !update.can_start(self.config.stuck_timeout) {
                return Err(ProvostError::Conflict(format!(
                    "There is an ongoing update with the last updated timestamp {}",
                    update.last_time_updated
                )));
            }
            self.update_repo.prepare_for_updating().await
        }
        .await;

        let released = self.mutex.release(guard).await;
        decision?;
        released
    }

    /// Batches across outdated tenants until the fleet is drained, the
    /// operator kills the run, or every remaining tenant has already
    /// been attempted. Returns `(killed, failed_count)`.
    async fn update_loop(&self, filter: &UpdateFilter) -> ProvostResult<(bool, u32)> {
        let mapped = mapped_versions(&self.config.template_versions);
        let env_types = Arc::new(filter.env_types());
        let mut attempted: BTreeSet<uuid::Uuid> = BTreeSet::new();
        let mut failed_count = 0u32;

        loop {
            // The kill switch is honored between batches only, to keep
            // per-namespace actions atomic.
            if self.update_repo.get_tenants_update().await?.status == UpdateStatus::Killed {
                info!("fleet update was stopped by an operator");
                return Ok((true, failed_count));
            }

            let batch: Vec<Tenant> = self
                .tenant_repo
                .tenants_to_update(
                    &mapped,
                    self.config.batch_size,
                    &self.config.commit,
                    filter.cluster_url.as_deref(),
                )
                .await?
                .into_iter()
                .filter(|t| attempted.insert(t.id))
                .collect();
            if batch.is_empty() {
                return Ok((false, failed_count));
            }

            failed_count += self.run_batch(batch, env_types.clone()).await;
        }
    }

    /// One batch: a bounded pool of per-tenant Update runs, each with a
    /// small retry budget.
    async fn run_batch(&self, batch: Vec<Tenant>, env_types: Arc<Vec<EnvType>>) -> u32 {
        let pool = Arc::new(Semaphore::new(self.config.worker_cap.max(1)));
        let mut workers: JoinSet<bool> = JoinSet::new();
        for tenant in batch {
            let Ok(permit) = pool.clone().acquire_owned().await else {
                break;
            };
            let executor = self.executor.clone();
            let env_types = env_types.clone();
            let retry_sleep = self.config.update_retry_sleep;
            workers.spawn(async move {
                let _permit = permit;
                let result = with_retries(UPDATE_ATTEMPTS, retry_sleep, || {
                    executor.update(&tenant, &env_types)
                })
                .await;
                if let Err(errors) = &result {
                    error!(
                        tenant_id = %tenant.id,
                        attempts = errors.len(),
                        last_error = %errors.last().map(ToString::to_string).unwrap_or_default(),
                        "updating tenant failed"
                    );
                }
                result.is_err()
            });
        }

        let mut failures = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(true) => failures += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "tenant update worker panicked");
                    failures += 1;
                }
            }
        }
        failures
    }

    /// Persists the terminal status and the applied file versions under
    /// the mutex.
    async fn finish(&self, outcome: &ProvostResult<(bool, u32)>) -> ProvostResult<()> {
        let guard = match self
            .mutex
            .lock(UPDATE_LOCK_ID, self.config.lock_timeout)
            .await
        {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(error = %e, "finishing the update without the advisory lock");
                None
            }
        };

        let persist = async {
            let mut update = self.update_repo.get_tenants_update().await?;
            match outcome {
                Ok((killed, failed_count)) => {
                    update.failed_count = *failed_count;
                    update.status = if *killed {
                        UpdateStatus::Killed
                    } else if *failed_count > 0 {
                        UpdateStatus::Incomplete
                    } else {
                        UpdateStatus::Finished
                    };
                    for manager in version_managers(&self.config.template_versions) {
                        manager.set_current(&mut update);
                    }
                }
                Err(_) => update.status = UpdateStatus::Failed,
            }
            update.last_time_updated = Utc::now();
            self.update_repo.save_tenants_update(&update).await
        }
        .await;

        if let Some(guard) = guard {
            self.mutex.release(guard).await?;
        }
        persist
    }
}

/// The production executor: builds a per-tenant [`ProvisioningService`]
/// from the namespace rows and runs the Update action over it. The
/// scheduler's own retry budget stands in for per-action self-healing.
pub struct EngineUpdateExecutor<R, L> {
    repo: R,
    loader: Arc<L>,
    http: reqwest::Client,
    config: Arc<EngineConfig>,
    resolve_cluster: Arc<dyn Fn(&str) -> ProvostResult<Cluster> + Send + Sync>,
    token_producer_for: Arc<dyn Fn(&Cluster) -> TokenProducer + Send + Sync>,
}

impl<R, L> EngineUpdateExecutor<R, L>
where
    R: TenantRepository + Clone + 'static,
    L: TemplateLoader + 'static,
{
    pub fn new(
        repo: R,
        loader: Arc<L>,
        http: reqwest::Client,
        config: Arc<EngineConfig>,
        resolve_cluster: Arc<dyn Fn(&str) -> ProvostResult<Cluster> + Send + Sync>,
        token_producer_for: Arc<dyn Fn(&Cluster) -> TokenProducer + Send + Sync>,
    ) -> Self {
        Self {
            repo,
            loader,
            http,
            config,
            resolve_cluster,
            token_producer_for,
        }
    }
}

impl<R, L> UpdateExecutor for EngineUpdateExecutor<R, L>
where
    R: TenantRepository + Clone + 'static,
    L: TemplateLoader + 'static,
{
    async fn update(&self, tenant: &Tenant, env_types: &[EnvType]) -> ProvostResult<()> {
        let namespaces = self.repo.get_namespaces(tenant.id).await?;
        if namespaces.is_empty() {
            return Ok(());
        }

        let mut clusters = std::collections::BTreeMap::new();
        for namespace in &namespaces {
            clusters.insert(
                namespace.env_type,
                (self.resolve_cluster)(&namespace.cluster_url)?,
            );
        }
        // Tenants live on a single cluster; its token covers the run.
        let token_cluster = (self.resolve_cluster)(&namespaces[0].cluster_url)?;

        let context = ServiceContext {
            config: self.config.clone(),
            clusters: ClusterMapping::new(clusters),
            os_username: tenant.os_username.clone(),
            ns_base_name: tenant.ns_base_name.clone(),
            user_token: None,
            token_producer: (self.token_producer_for)(&token_cluster),
            request_id: format!("fleet-update-{}", tenant.id),
        };
        let service = ProvisioningService::new(
            self.repo.clone(),
            self.loader.clone(),
            self.http.clone(),
            context,
            tenant.id,
        );
        service
            .update(env_types, namespaces, ActionOptions::update())
            .await
    }
}
