//! Tests for the rolling update scheduler over an in-memory repository,
//! with a stub executor standing in for the cluster-facing Update.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use provost_core::models::{
    EnvType, Namespace, NamespaceState, Tenant, TenantsUpdate, UpdateStatus, DEFAULT_ENV_TYPES,
};
use provost_core::repository::{TenantRepository, UpdateRepository};
use provost_core::{ProvostError, ProvostResult};
use provost_db::{AdvisoryLock, SurrealTenantRepository, SurrealUpdateRepository};
use provost_engine::{EngineConfig, TenantsUpdater, UpdateExecutor, UpdateFilter};
use provost_template::{mapped_versions, TemplateVersions};
use surrealdb::engine::local::{Db, Mem};
use surrealdb::Surreal;
use uuid::Uuid;

type Repo = SurrealTenantRepository<Db>;
type UpdateRepo = SurrealUpdateRepository<Db>;
type Updater = TenantsUpdater<Repo, UpdateRepo, AdvisoryLock<Db>, StubExecutor>;

async fn setup() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    provost_db::run_migrations(&db).await.unwrap();
    db
}

fn config() -> Arc<EngineConfig> {
    Arc::new(EngineConfig {
        commit: "124abcd".into(),
        template_versions: TemplateVersions::uniform("123abc"),
        batch_size: 5,
        update_retry_sleep: Duration::ZERO,
        lock_timeout: Duration::from_millis(300),
        ..EngineConfig::default()
    })
}

/// Applies the mapped versions straight to the namespace rows — the
/// database-visible effect of a successful Update — without a cluster.
struct StubExecutor {
    repo: Repo,
    update_repo: UpdateRepo,
    config: Arc<EngineConfig>,
    calls: AtomicU32,
    fail: bool,
    delay: Duration,
    /// Stop the fleet update after this many calls (0 = never), as an
    /// operator would.
    stop_after: u32,
}

impl StubExecutor {
    fn new(repo: Repo, update_repo: UpdateRepo, config: Arc<EngineConfig>) -> Self {
        Self {
            repo,
            update_repo,
            config,
            calls: AtomicU32::new(0),
            fail: false,
            delay: Duration::ZERO,
            stop_after: 0,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl UpdateExecutor for StubExecutor {
    async fn update(&self, tenant: &Tenant, env_types: &[EnvType]) -> ProvostResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        if self.stop_after > 0 && call == self.stop_after {
            self.update_repo.stop().await?;
        }
        if self.fail {
            return Err(ProvostError::internal("cluster unreachable"));
        }

        let mapped = mapped_versions(&self.config.template_versions);
        for mut namespace in self.repo.get_namespaces(tenant.id).await? {
            if !env_types.contains(&namespace.env_type) {
                continue;
            }
            if let Some(version) = mapped.get(&namespace.env_type) {
                namespace.version = version.clone();
            }
            namespace.updated_by = self.config.commit.clone();
            namespace.state = NamespaceState::Ready;
            self.repo.save_namespace(&namespace).await?;
        }
        Ok(())
    }
}

async fn fill_outdated(repo: &Repo, count: usize, tag: &str, cluster: &str) {
    for i in 0..count {
        let base = format!("user-{tag}-{i}");
        let mut tenant = Tenant::new(
            Uuid::new_v4(),
            format!("{base}@example.com"),
            format!("{base}@example.com"),
        );
        tenant.ns_base_name = base.clone();
        repo.create_tenant(&tenant).await.unwrap();
        for env_type in DEFAULT_ENV_TYPES {
            let mut ns = Namespace::new(
                tenant.id,
                env_type,
                env_type.namespace_name(&base),
                cluster,
                NamespaceState::Ready,
            );
            ns.version = "0000".into();
            ns.updated_by = "oldrev".into();
            repo.create_namespace(&ns).await.unwrap();
        }
    }
}

fn updater(db: &Surreal<Db>, executor: StubExecutor) -> Updater {
    TenantsUpdater::new(
        SurrealTenantRepository::new(db.clone()),
        SurrealUpdateRepository::new(db.clone()),
        AdvisoryLock::new(db.clone()),
        Arc::new(executor),
        config(),
    )
}

#[tokio::test]
async fn full_run_updates_every_outdated_tenant() {
    let db = setup().await;
    let repo = SurrealTenantRepository::new(db.clone());
    let update_repo = SurrealUpdateRepository::new(db.clone());
    fill_outdated(&repo, 12, "a", "https://c1").await;

    let executor = StubExecutor::new(repo.clone(), update_repo.clone(), config());
    let updater = updater(&db, executor);

    updater.start(UpdateFilter::default()).await.unwrap();

    let update = update_repo.get_tenants_update().await.unwrap();
    assert_eq!(update.status, UpdateStatus::Finished);
    assert_eq!(update.failed_count, 0);
    // Every template file version was recorded as applied.
    assert_eq!(update.file_versions.len(), 6);
    assert!(update.file_versions.values().all(|v| v == "123abc"));

    // Nothing is outdated any more.
    let mapped = mapped_versions(&config().template_versions);
    let remaining = repo
        .outdated_tenant_count(&mapped, "124abcd", None)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn concurrent_starts_produce_one_run_and_one_conflict() {
    let db = setup().await;
    let repo = SurrealTenantRepository::new(db.clone());
    let update_repo = SurrealUpdateRepository::new(db.clone());
    fill_outdated(&repo, 3, "a", "https://c1").await;

    let mut slow = StubExecutor::new(repo.clone(), update_repo.clone(), config());
    slow.delay = Duration::from_millis(300);
    let first = updater(&db, slow);
    let second = updater(
        &db,
        StubExecutor::new(repo.clone(), update_repo.clone(), config()),
    );

    let (a, b) = tokio::join!(
        first.start(UpdateFilter::default()),
        second.start(UpdateFilter::default()),
    );
    let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
    winner.unwrap();
    match loser {
        Err(ProvostError::Conflict(message)) => {
            assert!(message.contains("ongoing update") || message.contains("scheduling"));
        }
        other => panic!("expected a Conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn fresh_updating_row_is_rejected_with_its_timestamp() {
    let db = setup().await;
    let update_repo = SurrealUpdateRepository::new(db.clone());
    update_repo.prepare_for_updating().await.unwrap();
    let stamped = update_repo.get_tenants_update().await.unwrap();

    let repo = SurrealTenantRepository::new(db.clone());
    let updater = updater(
        &db,
        StubExecutor::new(repo, update_repo.clone(), config()),
    );
    let err = updater.start(UpdateFilter::default()).await.unwrap_err();
    match err {
        ProvostError::Conflict(message) => {
            assert!(message.contains("There is an ongoing update with the last updated timestamp"));
            assert!(message.contains(&stamped.last_time_updated.format("%Y").to_string()));
        }
        other => panic!("expected a Conflict, got {other}"),
    }
}

#[tokio::test]
async fn stale_updating_row_is_taken_over() {
    let db = setup().await;
    let update_repo = SurrealUpdateRepository::new(db.clone());
    let stale = TenantsUpdate {
        status: UpdateStatus::Updating,
        last_time_updated: chrono::Utc::now() - chrono::Duration::minutes(30),
        ..TenantsUpdate::default()
    };
    update_repo.save_tenants_update(&stale).await.unwrap();

    let repo = SurrealTenantRepository::new(db.clone());
    let updater = updater(
        &db,
        StubExecutor::new(repo, update_repo.clone(), config()),
    );
    updater.start(UpdateFilter::default()).await.unwrap();
    assert_eq!(
        update_repo.get_tenants_update().await.unwrap().status,
        UpdateStatus::Finished
    );
}

#[tokio::test]
async fn stop_between_batches_kills_the_run_and_keeps_the_rest_outdated() {
    let db = setup().await;
    let repo = SurrealTenantRepository::new(db.clone());
    let update_repo = SurrealUpdateRepository::new(db.clone());
    fill_outdated(&repo, 12, "a", "https://c1").await;

    // The operator stops the update while the first batch is running.
    let mut executor = StubExecutor::new(repo.clone(), update_repo.clone(), config());
    executor.stop_after = 5;
    let updater = updater(&db, executor);

    updater.start(UpdateFilter::default()).await.unwrap();

    let update = update_repo.get_tenants_update().await.unwrap();
    assert_eq!(update.status, UpdateStatus::Killed);

    // Only the first batch was driven; the remaining tenants still
    // carry their old version and stay visible to a subsequent run.
    let mapped = mapped_versions(&config().template_versions);
    let remaining = repo
        .outdated_tenant_count(&mapped, "124abcd", None)
        .await
        .unwrap();
    assert_eq!(remaining, 7);
}

#[tokio::test]
async fn failed_tenants_leave_the_run_incomplete_but_resumable() {
    let db = setup().await;
    let repo = SurrealTenantRepository::new(db.clone());
    let update_repo = SurrealUpdateRepository::new(db.clone());
    fill_outdated(&repo, 3, "a", "https://c1").await;

    let mut failing = StubExecutor::new(repo.clone(), update_repo.clone(), config());
    failing.fail = true;
    let first = updater(&db, failing);
    first.start(UpdateFilter::default()).await.unwrap();

    let update = update_repo.get_tenants_update().await.unwrap();
    assert_eq!(update.status, UpdateStatus::Incomplete);
    assert_eq!(update.failed_count, 3);

    // A later run still sees the tenants and drains them.
    let second = updater(
        &db,
        StubExecutor::new(repo.clone(), update_repo.clone(), config()),
    );
    second.start(UpdateFilter::default()).await.unwrap();
    assert_eq!(
        update_repo.get_tenants_update().await.unwrap().status,
        UpdateStatus::Finished
    );
    let mapped = mapped_versions(&config().template_versions);
    assert_eq!(
        repo.outdated_tenant_count(&mapped, "124abcd", None)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn filters_narrow_the_run_to_one_cluster_and_env_type() {
    let db = setup().await;
    let repo = SurrealTenantRepository::new(db.clone());
    let update_repo = SurrealUpdateRepository::new(db.clone());
    fill_outdated(&repo, 2, "a", "https://c1").await;
    fill_outdated(&repo, 3, "b", "https://c2").await;

    let executor = StubExecutor::new(repo.clone(), update_repo.clone(), config());
    let updater = updater(&db, executor);
    updater
        .start(UpdateFilter {
            cluster_url: Some("https://c1".into()),
            env_type: Some(EnvType::User),
        })
        .await
        .unwrap();

    // Only the user namespaces on cluster1 moved.
    let mapped = mapped_versions(&config().template_versions);
    for tenant in repo
        .tenants_to_update(&mapped, 100, "124abcd", Some("https://c2"))
        .await
        .unwrap()
    {
        for ns in repo.get_namespaces(tenant.id).await.unwrap() {
            assert_eq!(ns.version, "0000");
        }
    }
    let c1_tenants = repo
        .tenants_to_update(&mapped, 100, "124abcd", Some("https://c1"))
        .await
        .unwrap();
    for tenant in &c1_tenants {
        for ns in repo.get_namespaces(tenant.id).await.unwrap() {
            if ns.env_type == EnvType::User {
                assert_eq!(ns.version, "123abc");
                assert_eq!(ns.updated_by, "124abcd");
            } else {
                assert_eq!(ns.version, "0000");
            }
        }
    }
}

#[tokio::test]
async fn show_reports_status_versions_and_outdated_count() {
    let db = setup().await;
    let repo = SurrealTenantRepository::new(db.clone());
    let update_repo = SurrealUpdateRepository::new(db.clone());
    fill_outdated(&repo, 4, "a", "https://c1").await;

    let mut update = update_repo.get_tenants_update().await.unwrap();
    update.status = UpdateStatus::Incomplete;
    update.failed_count = 10;
    update_repo.save_tenants_update(&update).await.unwrap();

    let updater = updater(
        &db,
        StubExecutor::new(repo.clone(), update_repo.clone(), config()),
    );
    let info = updater.show(&UpdateFilter::default()).await.unwrap();
    assert_eq!(info.status, UpdateStatus::Incomplete);
    assert_eq!(info.failed_count, 10);
    assert_eq!(info.to_update, 4);
    assert_eq!(info.file_versions.len(), 6);
    assert!(info.file_versions.iter().all(|(_, v)| v == "123abc"));
}
