//! Static registry of object endpoints.
//!
//! For every object Kind the registry lists one [`MethodDefinition`] per
//! verb: the URL path template, whether the call needs the privileged
//! cluster token, and the protocol hooks that run around the request.
//! Hooks are tagged variants interpreted in [`crate::hooks`], so the
//! whole protocol surface is statically enumerable.

use std::collections::HashMap;
use std::sync::LazyLock;

use provost_core::object::{self, Object};
use provost_core::{ProvostError, ProvostResult};

/// HTTP-level verb of a method definition. `EnsureDeletion` is the
/// pseudo-verb that only polls GET until the object is gone and never
/// sends a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Post,
    Patch,
    Delete,
    Get,
    EnsureDeletion,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Post => "POST",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
            Verb::Get => "GET",
            Verb::EnsureDeletion => "ENSURE_DELETION",
        }
    }

    /// Whether the verb carries a serialized object body.
    pub fn has_body(&self) -> bool {
        matches!(self, Verb::Post | Verb::Patch)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-rewriting hook that runs before the HTTP call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeforeHook {
    None,
    /// GET the live object first; poll while it reports a terminating
    /// phase, and turn the PATCH into a POST when it does not exist.
    GetObjectAndMerge,
    /// GET the object with the privileged token and fail with
    /// `AlreadyExists` when it is present.
    FailIfAlreadyExists,
    /// Poll GET until 404/403 and never send a request.
    WaitUntilIsRemoved,
}

/// Response-interpreting hook that runs after the HTTP call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterHook {
    /// On 409: DELETE the offender, wait for it to vanish, redo the
    /// request once. A second conflict is fatal.
    WhenConflictThenDeleteAndRedo,
    /// 404 and 409 count as success.
    IgnoreWhenDoesNotExistOrConflicts,
    /// Poll the object with GET until `status.phase == "Active"`.
    GetObject,
    /// Poll the object with GET until it reports terminating or is gone.
    TryToWaitUntilIsGone,
}

/// One verb on one Kind: URL template, token role and hooks.
#[derive(Debug, Clone)]
pub struct MethodDefinition {
    pub verb: Verb,
    /// Path template with `{namespace}` and `{name}` placeholders. When
    /// the object has no name the trailing `/{name}` segment is dropped,
    /// which yields the collection path.
    pub path: String,
    pub requires_master_token: bool,
    pub before: BeforeHook,
    pub after: Vec<AfterHook>,
}

impl MethodDefinition {
    fn new(verb: Verb, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            requires_master_token: false,
            before: BeforeHook::None,
            after: Vec::new(),
        }
    }

    /// Renders the path template against an object's coordinates.
    pub fn render_path(&self, object: &Object) -> String {
        let name = object::get_name(object);
        let namespace = object::get_namespace(object);
        let path = if name.is_empty() {
            self.path.trim_end_matches("/{name}")
        } else {
            &self.path
        };
        path.replace("{namespace}", namespace).replace("{name}", name)
    }
}

/// The ordered method definitions of one object Kind.
#[derive(Debug, Clone)]
pub struct ObjectEndpoints {
    methods: Vec<MethodDefinition>,
}

impl ObjectEndpoints {
    pub fn method(&self, verb: Verb) -> ProvostResult<&MethodDefinition> {
        self.methods
            .iter()
            .find(|m| m.verb == verb)
            .ok_or_else(|| {
                ProvostError::validation(format!("no {verb} method defined for this object kind"))
            })
    }

    fn set_before(mut self, verb: Verb, before: BeforeHook) -> Self {
        if let Some(m) = self.methods.iter_mut().find(|m| m.verb == verb) {
            m.before = before;
        }
        self
    }

    fn set_after(mut self, verb: Verb, after: &[AfterHook]) -> Self {
        if let Some(m) = self.methods.iter_mut().find(|m| m.verb == verb) {
            m.after = after.to_vec();
        }
        self
    }

    fn set_master_token(mut self, verb: Verb) -> Self {
        if let Some(m) = self.methods.iter_mut().find(|m| m.verb == verb) {
            m.requires_master_token = true;
        }
        self
    }
}

/// Standard method set for a namespaced resource under `prefix`:
/// POST on the collection, PATCH/GET/DELETE on the item, and the
/// polling-only ENSURE_DELETION.
fn namespaced(prefix: &str, plural: &str) -> ObjectEndpoints {
    let collection = format!("{prefix}/namespaces/{{namespace}}/{plural}");
    let item = format!("{collection}/{{name}}");
    ObjectEndpoints {
        methods: vec![
            MethodDefinition::new(Verb::Post, collection),
            MethodDefinition::new(Verb::Patch, item.clone()),
            MethodDefinition::new(Verb::Get, item.clone()),
            MethodDefinition::new(Verb::Delete, item.clone()),
            MethodDefinition::new(Verb::EnsureDeletion, item),
        ],
    }
    .set_before(Verb::Patch, BeforeHook::GetObjectAndMerge)
    .set_before(Verb::EnsureDeletion, BeforeHook::WaitUntilIsRemoved)
    .set_after(Verb::Delete, &[AfterHook::IgnoreWhenDoesNotExistOrConflicts])
}

/// Project requests are special-cased: creation goes through the
/// projectrequests collection with the tenant's own token, while reads
/// and deletion address the materialized project.
fn project_request() -> ObjectEndpoints {
    let project = "/oapi/v1/projects/{name}";
    ObjectEndpoints {
        methods: vec![
            MethodDefinition::new(Verb::Post, "/oapi/v1/projectrequests"),
            MethodDefinition::new(Verb::Get, project),
            MethodDefinition::new(Verb::Delete, project),
            MethodDefinition::new(Verb::EnsureDeletion, project),
        ],
    }
    .set_before(Verb::Post, BeforeHook::FailIfAlreadyExists)
    .set_after(Verb::Post, &[AfterHook::GetObject])
    .set_master_token(Verb::Delete)
    .set_after(
        Verb::Delete,
        &[
            AfterHook::IgnoreWhenDoesNotExistOrConflicts,
            AfterHook::TryToWaitUntilIsGone,
        ],
    )
    .set_before(Verb::EnsureDeletion, BeforeHook::WaitUntilIsRemoved)
}

/// Namespaces are cluster-scoped: the item path is keyed by name only.
fn cluster_namespace() -> ObjectEndpoints {
    let item = "/api/v1/namespaces/{name}";
    ObjectEndpoints {
        methods: vec![
            MethodDefinition::new(Verb::Post, "/api/v1/namespaces"),
            MethodDefinition::new(Verb::Patch, item),
            MethodDefinition::new(Verb::Get, item),
            MethodDefinition::new(Verb::Delete, item),
            MethodDefinition::new(Verb::EnsureDeletion, item),
        ],
    }
    .set_before(Verb::Patch, BeforeHook::GetObjectAndMerge)
    .set_before(Verb::EnsureDeletion, BeforeHook::WaitUntilIsRemoved)
    .set_master_token(Verb::Delete)
    .set_after(Verb::Delete, &[AfterHook::IgnoreWhenDoesNotExistOrConflicts])
}

static REGISTRY: LazyLock<HashMap<&'static str, ObjectEndpoints>> = LazyLock::new(|| {
    use provost_core::object::*;

    let mut registry = HashMap::new();

    registry.insert(KIND_PROJECT_REQUEST, project_request());
    registry.insert(KIND_PROJECT, project_request());
    registry.insert(KIND_NAMESPACE, cluster_namespace());

    // Core v1 resources.
    for (kind, plural) in [
        (KIND_POD, "pods"),
        (KIND_SERVICE, "services"),
        (KIND_SECRET, "secrets"),
        (KIND_SERVICE_ACCOUNT, "serviceaccounts"),
        (KIND_CONFIG_MAP, "configmaps"),
        (KIND_REPLICATION_CONTROLLER, "replicationcontrollers"),
    ] {
        registry.insert(kind, namespaced("/api/v1", plural));
    }

    registry.insert(
        KIND_LIMIT_RANGE,
        namespaced("/api/v1", "limitranges")
            .set_after(Verb::Post, &[AfterHook::WhenConflictThenDeleteAndRedo]),
    );
    registry.insert(
        KIND_RESOURCE_QUOTA,
        namespaced("/api/v1", "resourcequotas").set_after(
            Verb::Post,
            &[AfterHook::WhenConflictThenDeleteAndRedo, AfterHook::GetObject],
        ),
    );
    registry.insert(
        KIND_PERSISTENT_VOLUME_CLAIM,
        namespaced("/api/v1", "persistentvolumeclaims").set_after(
            Verb::Delete,
            &[
                AfterHook::IgnoreWhenDoesNotExistOrConflicts,
                AfterHook::TryToWaitUntilIsGone,
            ],
        ),
    );

    // OpenShift API group.
    for (kind, plural) in [
        (KIND_ROLE, "roles"),
        (KIND_ROLE_BINDING, "rolebindings"),
        (KIND_ROUTE, "routes"),
        (KIND_DEPLOYMENT_CONFIG, "deploymentconfigs"),
        (KIND_BUILD_CONFIG, "buildconfigs"),
        (KIND_BUILD, "builds"),
        (KIND_IMAGE_STREAM, "imagestreams"),
    ] {
        registry.insert(kind, namespaced("/oapi/v1", plural));
    }
    registry.insert(
        KIND_ROLE_BINDING_RESTRICTION,
        namespaced("/oapi/v1", "rolebindingrestrictions").set_master_token(Verb::Post),
    );

    // Workload API groups.
    for (kind, plural) in [
        (KIND_DEPLOYMENT, "deployments"),
        (KIND_REPLICA_SET, "replicasets"),
        (KIND_STATEFUL_SET, "statefulsets"),
        (KIND_DAEMON_SET, "daemonsets"),
    ] {
        registry.insert(kind, namespaced("/apis/apps/v1", plural));
    }
    registry.insert(KIND_JOB, namespaced("/apis/batch/v1", "jobs"));
    registry.insert(KIND_CRON_JOB, namespaced("/apis/batch/v1beta1", "cronjobs"));
    registry.insert(
        KIND_HORIZONTAL_POD_AUTO_SCALER,
        namespaced("/apis/autoscaling/v1", "horizontalpodautoscalers"),
    );

    registry
});

/// Looks up the endpoints of an object Kind.
pub fn object_endpoints(kind: &str) -> ProvostResult<&'static ObjectEndpoints> {
    REGISTRY
        .get(kind)
        .ok_or_else(|| ProvostError::validation(format!("unknown object kind '{kind}'")))
}
