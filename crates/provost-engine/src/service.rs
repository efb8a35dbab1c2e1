//! The concurrent apply loop and the healing strategies.
//!
//! One [`ProvisioningService`] serves one tenant request. Each action
//! fans out into one worker per environment type; within a worker the
//! objects of every operation set are applied strictly sequentially in
//! Kind order, and the namespace row transition is persisted whatever
//! the outcome. Worker errors are aggregated into a single error, which
//! the action's healing strategy may swallow by rerunning the action
//! once with healing disabled.

use std::pin::Pin;
use std::sync::Arc;

use provost_cluster::hooks::apply_object;
use provost_cluster::Client;
use provost_core::models::{EnvType, Namespace, NamespaceState, DEFAULT_ENV_TYPES};
use provost_core::models::tenant::sanitize_username;
use provost_core::object;
use provost_core::repository::{construct_ns_base_name, TenantRepository};
use provost_core::{ProvostError, ProvostResult};
use provost_template::{EnvData, TemplateLoader};
use tokio::task::JoinSet;
use tracing::{error, warn};
use uuid::Uuid;

use crate::action::{
    aggregate_errors, ActionKind, ActionOptions, ActionSpec, DeleteOptions,
};
use crate::env_service::{EnvironmentTypeService, ServiceContext};

type BoxedResult<'a> = Pin<Box<dyn Future<Output = ProvostResult<()>> + Send + 'a>>;

/// Drives the four namespace actions for one tenant.
pub struct ProvisioningService<R, L> {
    repo: R,
    loader: Arc<L>,
    http: reqwest::Client,
    context: Arc<ServiceContext>,
    tenant_id: Uuid,
}

impl<R, L> ProvisioningService<R, L>
where
    R: TenantRepository + Clone + 'static,
    L: TemplateLoader + 'static,
{
    pub fn new(
        repo: R,
        loader: Arc<L>,
        http: reqwest::Client,
        context: ServiceContext,
        tenant_id: Uuid,
    ) -> Self {
        Self {
            repo,
            loader,
            http,
            context: Arc::new(context),
            tenant_id,
        }
    }

    fn with_context(&self, context: ServiceContext) -> Self {
        Self {
            repo: self.repo.clone(),
            loader: self.loader.clone(),
            http: self.http.clone(),
            context: Arc::new(context),
            tenant_id: self.tenant_id,
        }
    }

    /// Materializes the given environment types from scratch.
    pub async fn create(
        &self,
        env_types: &[EnvType],
        opts: ActionOptions,
    ) -> ProvostResult<()> {
        let action = Arc::new(ActionSpec {
            kind: ActionKind::Create,
            existing: Vec::new(),
        });
        self.run(env_types, action, opts.allow_self_healing).await
    }

    /// Rolls the existing namespaces forward to the current bundle.
    pub async fn update(
        &self,
        env_types: &[EnvType],
        existing: Vec<Namespace>,
        opts: ActionOptions,
    ) -> ProvostResult<()> {
        let action = Arc::new(ActionSpec {
            kind: ActionKind::Update,
            existing,
        });
        self.run(env_types, action, opts.allow_self_healing).await
    }

    /// Cleans the namespaces' contents, or tears the projects down when
    /// the options say `remove_from_cluster`.
    pub async fn delete(
        &self,
        env_types: &[EnvType],
        existing: Vec<Namespace>,
        opts: DeleteOptions,
    ) -> ProvostResult<()> {
        let action = Arc::new(ActionSpec {
            kind: ActionKind::Delete {
                remove_from_cluster: opts.remove_from_cluster,
                keep_tenant: opts.keep_tenant,
            },
            existing,
        });
        self.run(env_types, action, opts.allow_self_healing).await
    }

    async fn run(
        &self,
        env_types: &[EnvType],
        action: Arc<ActionSpec>,
        allow_self_healing: bool,
    ) -> ProvostResult<()> {
        let errors = self.fan_out(env_types, action.clone()).await;

        if !errors.is_empty() {
            let aggregate =
                ProvostError::internal(aggregate_errors(action.verb(), env_types, &errors));
            if !allow_self_healing {
                return Err(aggregate);
            }
            self.heal(&action, aggregate).await?;
        }
        self.post_check(&action).await
    }

    /// One worker per environment type; each owns its type end-to-end.
    async fn fan_out(&self, env_types: &[EnvType], action: Arc<ActionSpec>) -> Vec<ProvostError> {
        let mut workers: JoinSet<ProvostResult<()>> = JoinSet::new();
        for &env_type in env_types {
            let repo = self.repo.clone();
            let loader = self.loader.clone();
            let http = self.http.clone();
            let context = self.context.clone();
            let action = action.clone();
            let tenant_id = self.tenant_id;
            workers.spawn(async move {
                apply_env_type(repo, context, loader, http, tenant_id, action, env_type).await
            });
        }

        let mut errors = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(ProvostError::internal(format!("worker panicked: {e}"))),
            }
        }
        errors
    }

    fn heal(&self, action: &ActionSpec, original: ProvostError) -> BoxedResult<'_> {
        match action.kind {
            ActionKind::Create => self.heal_create(original),
            ActionKind::Update => self.heal_update(original),
            ActionKind::Delete {
                remove_from_cluster,
                keep_tenant,
            } => self.heal_delete(remove_from_cluster, keep_tenant, original),
        }
    }

    /// Create healing: the base name is assumed burned. Remove whatever
    /// was partially materialized, pick a fresh base name and recreate
    /// everything once, with healing disabled.
    fn heal_create(&self, original: ProvostError) -> BoxedResult<'_> {
        Box::pin(async move {
            error!(error = %original, "the creation failed, starting self-healing logic");
            let suffix =
                format!("while doing self-healing operations triggered by error: [{original}]");

            let mut tenant = self
                .repo
                .get_tenant(self.tenant_id)
                .await
                .map_err(|e| healing_step(format!("unable to get tenant: {e}"), &suffix))?;
            let namespaces = self
                .repo
                .get_namespaces(self.tenant_id)
                .await
                .map_err(|e| healing_step(format!("unable to get namespaces: {e}"), &suffix))?;

            self.delete(
                &DEFAULT_ENV_TYPES,
                namespaces,
                DeleteOptions::new()
                    .enable_self_healing()
                    .remove_from_cluster()
                    .but_keep_tenant_entity(),
            )
            .await
            .map_err(|e| healing_step(format!("deletion of namespaces failed: {e}"), &suffix))?;

            let username = sanitize_username(&self.context.os_username);
            let new_base_name = construct_ns_base_name(&self.repo, &username)
                .await
                .map_err(|e| {
                    healing_step(format!("unable to construct namespace base name: {e}"), &suffix)
                })?;
            tenant.ns_base_name = new_base_name.clone();
            self.repo.save_tenant(&tenant).await.map_err(|e| {
                healing_step(format!("unable to update tenant db entity: {e}"), &suffix)
            })?;

            let healed = self.with_context(self.context.with_ns_base_name(new_base_name));
            healed
                .create(&DEFAULT_ENV_TYPES, ActionOptions::create())
                .await
                .map_err(|e| {
                    healing_step(format!("unable to create new namespaces: {e}"), &suffix)
                })
        })
    }

    /// Update healing: rerun the update over the tenant's current rows.
    fn heal_update(&self, original: ProvostError) -> BoxedResult<'_> {
        Box::pin(async move {
            warn!(error = %original, "the update failed, redoing it once");
            let namespaces = self.repo.get_namespaces(self.tenant_id).await?;
            self.update(&DEFAULT_ENV_TYPES, namespaces, ActionOptions::update())
                .await
        })
    }

    /// Delete healing: rerun the same deletion over the current rows.
    fn heal_delete(
        &self,
        remove_from_cluster: bool,
        keep_tenant: bool,
        original: ProvostError,
    ) -> BoxedResult<'_> {
        Box::pin(async move {
            warn!(error = %original, "the deletion failed, redoing it once");
            let namespaces = self.repo.get_namespaces(self.tenant_id).await?;
            let mut opts = DeleteOptions::new();
            if remove_from_cluster {
                opts = opts.remove_from_cluster();
            }
            if keep_tenant {
                opts = opts.but_keep_tenant_entity();
            }
            self.delete(&DEFAULT_ENV_TYPES, namespaces, opts).await
        })
    }

    /// Tenant-level bookkeeping after a removal: the tenant row goes
    /// only when no namespace is left; leftovers surface as an error
    /// naming them.
    async fn post_check(&self, action: &ActionSpec) -> ProvostResult<()> {
        let ActionKind::Delete {
            remove_from_cluster: true,
            keep_tenant,
        } = action.kind
        else {
            return Ok(());
        };

        let namespaces = self.repo.get_namespaces(self.tenant_id).await?;
        let names: Vec<&str> = namespaces.iter().map(|ns| ns.name.as_str()).collect();
        if keep_tenant {
            if namespaces.is_empty() {
                return Ok(());
            }
            return Err(ProvostError::internal(format!(
                "all namespaces of the tenant {} weren't properly removed - some namespaces \
                 {names:?} still exist",
                self.tenant_id
            )));
        }
        if namespaces.is_empty() {
            return self.repo.delete_tenant(self.tenant_id).await;
        }
        Err(ProvostError::internal(format!(
            "cannot remove tenant {} from DB - some namespaces {names:?} still exist",
            self.tenant_id
        )))
    }
}

fn healing_step(message: String, suffix: &str) -> ProvostError {
    ProvostError::internal(format!("{message} {suffix}"))
}

/// One worker: owns one environment type end-to-end.
async fn apply_env_type<R, L>(
    repo: R,
    context: Arc<ServiceContext>,
    loader: Arc<L>,
    http: reqwest::Client,
    tenant_id: Uuid,
    action: Arc<ActionSpec>,
    env_type: EnvType,
) -> ProvostResult<()>
where
    R: TenantRepository,
    L: TemplateLoader,
{
    let env = EnvironmentTypeService::new(env_type, context.clone(), loader);
    let cluster = env.cluster()?.clone();

    let namespace = match action.kind {
        ActionKind::Create => {
            let namespace = Namespace::new(
                tenant_id,
                env_type,
                env.namespace_name(),
                &cluster.api_url,
                NamespaceState::Provisioning,
            );
            repo.create_namespace(&namespace).await?;
            Some(namespace)
        }
        ActionKind::Update => match action.existing_namespace(env_type).cloned() {
            Some(mut namespace) => {
                namespace.state = NamespaceState::Updating;
                repo.save_namespace(&namespace).await?;
                Some(namespace)
            }
            None => None,
        },
        ActionKind::Delete { .. } => action.existing_namespace(env_type).cloned(),
    };
    let Some(namespace) = namespace else {
        // Nothing recorded for this environment type; nothing to do.
        return Ok(());
    };

    let client = Client::new(http, cluster.api_url.clone(), context.token_producer.clone());
    let (env_data, op_sets) = match action.operation_sets(&env, &client).await {
        Ok(composed) => composed,
        Err(e) => {
            let empty = EnvData {
                env_type,
                templates: Vec::new(),
            };
            persist_transition(&repo, &action, &empty, &context.config.commit, namespace, true)
                .await;
            return Err(ProvostError::internal(format!(
                "the method {} failed for the cluster {}: {e}",
                action.verb(),
                cluster.api_url
            )));
        }
    };

    let mut first_error = None;
    'sets: for set in &op_sets {
        for obj in &set.objects {
            if let Err(e) =
                apply_object(&client, set.verb, obj, action.force_master_token()).await
            {
                first_error = Some(ProvostError::internal(format!(
                    "unable to perform {} on object {} '{}' in namespace {} on cluster {}: {e}",
                    set.verb,
                    object::get_kind(obj),
                    object::get_name(obj),
                    namespace.name,
                    cluster.api_url,
                )));
                break 'sets;
            }
        }
    }

    let failed = first_error.is_some();
    persist_transition(
        &repo,
        &action,
        &env_data,
        &context.config.commit,
        namespace,
        failed,
    )
    .await;

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Persists the terminal state of the namespace row for this action.
/// Persistence failures are logged, not propagated: the cluster-side
/// outcome already happened.
async fn persist_transition<R: TenantRepository>(
    repo: &R,
    action: &ActionSpec,
    env_data: &EnvData,
    commit: &str,
    mut namespace: Namespace,
    failed: bool,
) {
    let result = match action.kind {
        ActionKind::Create => {
            namespace.version = env_data.version();
            namespace.state = if failed {
                NamespaceState::Failed
            } else {
                NamespaceState::Ready
            };
            namespace.updated_by = commit.to_string();
            repo.save_namespace(&namespace).await
        }
        ActionKind::Update => {
            if failed {
                namespace.state = NamespaceState::Failed;
            } else {
                namespace.state = NamespaceState::Ready;
                namespace.version = env_data.version();
            }
            namespace.updated_by = commit.to_string();
            repo.save_namespace(&namespace).await
        }
        ActionKind::Delete {
            remove_from_cluster,
            ..
        } => {
            if failed {
                namespace.state = NamespaceState::Failed;
                repo.save_namespace(&namespace).await
            } else if remove_from_cluster {
                repo.delete_namespace(&namespace).await
            } else {
                Ok(())
            }
        }
    };

    if let Err(e) = result {
        error!(
            env_type = %namespace.env_type,
            namespace = %namespace.name,
            cluster = %namespace.cluster_url,
            error = %e,
            "persisting the namespace entity transition failed"
        );
    }
}
