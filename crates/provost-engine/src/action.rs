//! The four namespace actions and their operation sets.
//!
//! An action decides which template objects participate, which HTTP verb
//! drives them, how the namespace row transitions, and how failures are
//! healed. Actions are tagged variants interpreted by the apply loop in
//! [`crate::service`].

use provost_cluster::endpoints::Verb;
use provost_cluster::hooks::apply_object;
use provost_cluster::Client;
use provost_core::models::{EnvType, Namespace};
use provost_core::object::{self, Object};
use provost_core::{ProvostError, ProvostResult};
use provost_template::{EnvData, TemplateLoader};
use tracing::warn;

use crate::env_service::EnvironmentTypeService;

/// Options shared by Create and Update.
#[derive(Debug, Clone, Copy)]
pub struct ActionOptions {
    pub(crate) allow_self_healing: bool,
}

impl ActionOptions {
    pub fn create() -> Self {
        Self {
            allow_self_healing: false,
        }
    }

    pub fn update() -> Self {
        Self {
            allow_self_healing: false,
        }
    }

    pub fn enable_self_healing(mut self) -> Self {
        self.allow_self_healing = true;
        self
    }

    pub fn disable_self_healing(mut self) -> Self {
        self.allow_self_healing = false;
        self
    }
}

/// Options of the Delete action. The default cleans the namespaces'
/// contents but keeps the projects and the tenant.
#[derive(Debug, Clone, Copy)]
pub struct DeleteOptions {
    pub(crate) allow_self_healing: bool,
    pub(crate) remove_from_cluster: bool,
    pub(crate) keep_tenant: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            allow_self_healing: false,
            remove_from_cluster: false,
            keep_tenant: true,
        }
    }
}

impl DeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_self_healing(mut self) -> Self {
        self.allow_self_healing = true;
        self
    }

    pub fn disable_self_healing(mut self) -> Self {
        self.allow_self_healing = false;
        self
    }

    /// Tear the projects down on the cluster instead of just emptying
    /// them; by default this also removes the tenant row.
    pub fn remove_from_cluster(mut self) -> Self {
        self.remove_from_cluster = true;
        self.keep_tenant = false;
        self
    }

    pub fn but_keep_tenant_entity(mut self) -> Self {
        self.keep_tenant = true;
        self
    }
}

/// What the apply loop runs: the action kind plus the namespace rows an
/// Update/Delete operates on.
#[derive(Debug, Clone)]
pub(crate) enum ActionKind {
    Create,
    Update,
    Delete {
        remove_from_cluster: bool,
        keep_tenant: bool,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct ActionSpec {
    pub kind: ActionKind,
    pub existing: Vec<Namespace>,
}

/// A verb applied to an ordered object list, as one unit.
#[derive(Debug, Clone)]
pub(crate) struct OperationSet {
    pub verb: Verb,
    pub objects: Vec<Object>,
}

impl OperationSet {
    fn new(verb: Verb, objects: Vec<Object>) -> Self {
        Self { verb, objects }
    }
}

/// The workload and data kinds the Clean action lists and deletes.
pub const ALL_TO_GET_AND_DELETE: [&str; 17] = [
    object::KIND_SERVICE,
    object::KIND_POD,
    object::KIND_REPLICATION_CONTROLLER,
    object::KIND_DAEMON_SET,
    object::KIND_DEPLOYMENT,
    object::KIND_REPLICA_SET,
    object::KIND_STATEFUL_SET,
    object::KIND_JOB,
    object::KIND_HORIZONTAL_POD_AUTO_SCALER,
    object::KIND_CRON_JOB,
    object::KIND_DEPLOYMENT_CONFIG,
    object::KIND_BUILD_CONFIG,
    object::KIND_BUILD,
    object::KIND_IMAGE_STREAM,
    object::KIND_ROUTE,
    object::KIND_PERSISTENT_VOLUME_CLAIM,
    object::KIND_CONFIG_MAP,
];

impl ActionSpec {
    /// The primary HTTP verb of the action.
    pub fn verb(&self) -> Verb {
        match self.kind {
            ActionKind::Create => Verb::Post,
            ActionKind::Update => Verb::Patch,
            ActionKind::Delete { .. } => Verb::Delete,
        }
    }

    /// Whether every call runs with the privileged cluster token.
    /// Create must not: the project request has to be issued as the user.
    pub fn force_master_token(&self) -> bool {
        !matches!(self.kind, ActionKind::Create)
    }

    pub fn existing_namespace(&self, env_type: EnvType) -> Option<&Namespace> {
        self.existing.iter().find(|ns| ns.env_type == env_type)
    }

    /// Which template objects participate.
    pub fn filter(&self, object: &Object) -> bool {
        let kind = object::get_kind(object);
        match self.kind {
            ActionKind::Create => true,
            ActionKind::Update => kind != object::KIND_PROJECT_REQUEST,
            ActionKind::Delete {
                remove_from_cluster: true,
                ..
            } => kind == object::KIND_PROJECT_REQUEST,
            ActionKind::Delete {
                remove_from_cluster: false,
                ..
            } => ALL_TO_GET_AND_DELETE.contains(&kind),
        }
    }

    /// Composes the operation sets for one environment type.
    pub async fn operation_sets<L: TemplateLoader>(
        &self,
        env: &EnvironmentTypeService<L>,
        client: &Client,
    ) -> ProvostResult<(EnvData, Vec<OperationSet>)> {
        match &self.kind {
            ActionKind::Create => self.common_sets(env).await,
            ActionKind::Update => {
                let (env_data, mut sets) = self.common_sets(env).await?;
                self.append_delete_diff(env, &mut sets).await;
                Ok((env_data, sets))
            }
            ActionKind::Delete {
                remove_from_cluster: true,
                ..
            } => {
                let (env_data, objects) = env.env_data_and_objects().await?;
                let mut to_delete: Vec<Object> =
                    objects.into_iter().filter(|o| self.filter(o)).collect();
                object::sort_by_kind_reversed(&mut to_delete);
                Ok((env_data, vec![OperationSet::new(Verb::Delete, to_delete)]))
            }
            ActionKind::Delete {
                remove_from_cluster: false,
                ..
            } => {
                let (env_data, _) = env.env_data_and_objects().await?;
                let mut to_clean = clean_objects(client, &env.namespace_name()).await?;
                object::sort_by_kind_reversed(&mut to_clean);
                Ok((
                    env_data,
                    vec![
                        OperationSet::new(Verb::Delete, to_clean.clone()),
                        OperationSet::new(Verb::EnsureDeletion, to_clean),
                    ],
                ))
            }
        }
    }

    /// The shared Create/Update composition: one primary set over the
    /// filtered objects, plus the additional object either appended or
    /// split into a trailing DELETE set.
    async fn common_sets<L: TemplateLoader>(
        &self,
        env: &EnvironmentTypeService<L>,
    ) -> ProvostResult<(EnvData, Vec<OperationSet>)> {
        let (env_data, objects) = env.env_data_and_objects().await?;
        let mut primary: Vec<Object> = objects.into_iter().filter(|o| self.filter(o)).collect();

        let mut sets = Vec::new();
        if let Some((additional, should_be_added)) = env.additional_object() {
            if should_be_added {
                primary.push(additional);
            } else {
                sets.push(OperationSet::new(Verb::Delete, vec![additional]));
            }
        }
        object::sort_by_kind(&mut primary);
        sets.insert(0, OperationSet::new(self.verb(), primary));
        Ok((env_data, sets))
    }

    /// Objects of the previously applied bundle that the current one no
    /// longer contains get a DELETE set. A failure to reconstruct the
    /// previous bundle only forfeits the cleanup, never the update.
    async fn append_delete_diff<L: TemplateLoader>(
        &self,
        env: &EnvironmentTypeService<L>,
        sets: &mut Vec<OperationSet>,
    ) {
        let Some(previous) = self
            .existing_namespace(env.env_type())
            .map(|ns| ns.version.clone())
            .filter(|v| !v.is_empty())
        else {
            return;
        };
        let current: Vec<Object> = sets
            .iter()
            .filter(|set| set.verb != Verb::Delete)
            .flat_map(|set| set.objects.iter().cloned())
            .collect();
        match env.missing_objects_comparing_with(&previous, &current).await {
            Ok(missing) if missing.is_empty() => {}
            Ok(missing) => {
                if let Some(set) = sets.iter_mut().find(|s| s.verb == Verb::Delete) {
                    set.objects.extend(missing);
                    object::sort_by_kind_reversed(&mut set.objects);
                } else {
                    let mut objects = missing;
                    object::sort_by_kind_reversed(&mut objects);
                    sets.push(OperationSet::new(Verb::Delete, objects));
                }
            }
            Err(e) => {
                warn!(
                    env_type = %env.env_type(),
                    previous_version = %previous,
                    error = %e,
                    "unable to retrieve objects that should be removed from the namespace"
                );
            }
        }
    }
}

/// Clean discovery: GET the collection of every deletable kind in the
/// namespace and synthesize a minimal stub per returned item. Kinds the
/// cluster does not expose (404/403) are skipped; anything else fails
/// the action.
async fn clean_objects(client: &Client, namespace_name: &str) -> ProvostResult<Vec<Object>> {
    let mut to_clean = Vec::new();
    for kind in ALL_TO_GET_AND_DELETE {
        let listing = object::new_stub(kind, namespace_name, "");
        let result = match apply_object(client, Verb::Get, &listing, true).await {
            Ok(result) => result,
            Err(ProvostError::HttpStatus { code: 404, .. })
            | Err(ProvostError::HttpStatus { code: 403, .. }) => {
                warn!(kind, namespace_name, "object kind is not available, skipping");
                continue;
            }
            Err(e) => {
                return Err(ProvostError::internal(format!(
                    "unable to get list of current objects of kind {kind} in namespace \
                     {namespace_name} while getting list of objects to apply: {e}"
                )))
            }
        };
        let Ok(listing) = result.parse_object() else {
            continue;
        };
        let Some(items) = listing.get("items").and_then(serde_yaml::Value::as_sequence) else {
            continue;
        };
        for item in items {
            let Some(item) = item.as_mapping() else {
                continue;
            };
            let name = object::get_name(item);
            if !name.is_empty() {
                to_clean.push(object::new_stub(kind, namespace_name, name));
            }
        }
    }
    Ok(to_clean)
}

/// Renders the per-worker errors into the single aggregate the caller
/// sees. The listing is capped; anything beyond the cap is summarized.
pub(crate) fn aggregate_errors(
    verb: Verb,
    env_types: &[EnvType],
    errors: &[ProvostError],
) -> String {
    const MAX_LISTED: usize = 100;
    let mut listing = String::new();
    for (index, error) in errors.iter().take(MAX_LISTED).enumerate() {
        listing.push_str(&format!(" #{}: {};", index + 1, error));
    }
    if errors.len() > MAX_LISTED {
        listing.push_str(&format!(" … and {} more", errors.len() - MAX_LISTED));
    }
    let types: Vec<&str> = env_types.iter().map(EnvType::as_str).collect();
    format!(
        "{verb} method applied to namespace types [{}] failed with one or more errors:{listing}",
        types.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use provost_core::object::new_stub;

    #[test]
    fn create_accepts_everything_update_drops_project_requests() {
        let create = ActionSpec {
            kind: ActionKind::Create,
            existing: vec![],
        };
        let update = ActionSpec {
            kind: ActionKind::Update,
            existing: vec![],
        };
        let request = new_stub(object::KIND_PROJECT_REQUEST, "", "john");
        let route = new_stub(object::KIND_ROUTE, "john", "r1");

        assert!(create.filter(&request));
        assert!(create.filter(&route));
        assert!(!update.filter(&request));
        assert!(update.filter(&route));
    }

    #[test]
    fn removal_keeps_only_the_project_request() {
        let removal = ActionSpec {
            kind: ActionKind::Delete {
                remove_from_cluster: true,
                keep_tenant: false,
            },
            existing: vec![],
        };
        assert!(removal.filter(&new_stub(object::KIND_PROJECT_REQUEST, "", "john")));
        assert!(!removal.filter(&new_stub(object::KIND_SERVICE, "john", "svc")));
    }

    #[test]
    fn clean_keeps_only_deletable_workload_kinds() {
        let clean = ActionSpec {
            kind: ActionKind::Delete {
                remove_from_cluster: false,
                keep_tenant: true,
            },
            existing: vec![],
        };
        assert!(clean.filter(&new_stub(object::KIND_SERVICE, "john-che", "svc")));
        assert!(clean.filter(&new_stub(object::KIND_PERSISTENT_VOLUME_CLAIM, "john-che", "pvc")));
        assert!(!clean.filter(&new_stub(object::KIND_PROJECT_REQUEST, "", "john")));
        assert!(!clean.filter(&new_stub(object::KIND_ROLE_BINDING, "john-che", "admin")));
    }

    #[test]
    fn create_uses_the_user_token_for_the_primary_flow() {
        let create = ActionSpec {
            kind: ActionKind::Create,
            existing: vec![],
        };
        let update = ActionSpec {
            kind: ActionKind::Update,
            existing: vec![],
        };
        assert!(!create.force_master_token());
        assert!(update.force_master_token());
    }

    #[test]
    fn aggregate_error_lists_every_worker_error() {
        let errors = vec![
            ProvostError::Transport("boom".into()),
            ProvostError::internal("later"),
        ];
        let message = aggregate_errors(Verb::Post, &[EnvType::User, EnvType::Che], &errors);
        assert!(message
            .starts_with("POST method applied to namespace types [user, che] failed with one or more errors:"));
        assert!(message.contains("#1: Transport error: boom;"));
        assert!(message.contains("#2: Internal error: later;"));
    }
}
