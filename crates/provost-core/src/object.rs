//! Raw view over template-rendered cluster resources.
//!
//! Objects are kept as untyped YAML mappings; the engine only ever needs
//! the Kind, the name/namespace coordinates and a few labels, and the
//! cluster accepts the full document verbatim. Accessors here are total:
//! a missing or mis-typed field reads as empty.

use serde_yaml::{Mapping, Value};

/// A single declarative resource object.
pub type Object = Mapping;

pub const KIND_TEMPLATE: &str = "Template";
pub const KIND_LIST: &str = "List";
pub const KIND_NAMESPACE: &str = "Namespace";
pub const KIND_PROJECT: &str = "Project";
pub const KIND_PROJECT_REQUEST: &str = "ProjectRequest";
pub const KIND_ROLE: &str = "Role";
pub const KIND_ROLE_BINDING: &str = "RoleBinding";
pub const KIND_ROLE_BINDING_RESTRICTION: &str = "RoleBindingRestriction";
pub const KIND_LIMIT_RANGE: &str = "LimitRange";
pub const KIND_RESOURCE_QUOTA: &str = "ResourceQuota";
pub const KIND_PERSISTENT_VOLUME_CLAIM: &str = "PersistentVolumeClaim";
pub const KIND_SERVICE: &str = "Service";
pub const KIND_SECRET: &str = "Secret";
pub const KIND_SERVICE_ACCOUNT: &str = "ServiceAccount";
pub const KIND_CONFIG_MAP: &str = "ConfigMap";
pub const KIND_ROUTE: &str = "Route";
pub const KIND_DEPLOYMENT: &str = "Deployment";
pub const KIND_DEPLOYMENT_CONFIG: &str = "DeploymentConfig";
pub const KIND_JOB: &str = "Job";
pub const KIND_POD: &str = "Pod";
pub const KIND_REPLICATION_CONTROLLER: &str = "ReplicationController";
pub const KIND_REPLICA_SET: &str = "ReplicaSet";
pub const KIND_STATEFUL_SET: &str = "StatefulSet";
pub const KIND_DAEMON_SET: &str = "DaemonSet";
pub const KIND_CRON_JOB: &str = "CronJob";
pub const KIND_HORIZONTAL_POD_AUTO_SCALER: &str = "HorizontalPodAutoScaler";
pub const KIND_BUILD_CONFIG: &str = "BuildConfig";
pub const KIND_BUILD: &str = "Build";
pub const KIND_IMAGE_STREAM: &str = "ImageStream";

/// Priority objects of unknown Kind sort with.
const UNKNOWN_KIND_PRIORITY: i32 = 30;

/// Apply priority of a Kind. Lower applies first; DELETE sets use the
/// reverse order.
pub fn kind_priority(kind: &str) -> i32 {
    match kind {
        KIND_NAMESPACE | KIND_PROJECT_REQUEST => 1,
        KIND_ROLE => 2,
        KIND_ROLE_BINDING_RESTRICTION => 3,
        KIND_LIMIT_RANGE => 4,
        KIND_RESOURCE_QUOTA => 5,
        KIND_SECRET => 6,
        KIND_SERVICE_ACCOUNT => 7,
        KIND_SERVICE => 8,
        KIND_ROLE_BINDING | KIND_POD => 9,
        KIND_PERSISTENT_VOLUME_CLAIM | KIND_REPLICA_SET => 10,
        KIND_CONFIG_MAP | KIND_REPLICATION_CONTROLLER => 11,
        KIND_DEPLOYMENT_CONFIG | KIND_DEPLOYMENT => 12,
        KIND_ROUTE => 13,
        KIND_JOB => 14,
        KIND_DAEMON_SET => 15,
        KIND_STATEFUL_SET => 16,
        KIND_HORIZONTAL_POD_AUTO_SCALER => 17,
        KIND_CRON_JOB => 18,
        KIND_BUILD_CONFIG => 19,
        KIND_BUILD => 20,
        KIND_IMAGE_STREAM => 21,
        _ => UNKNOWN_KIND_PRIORITY,
    }
}

/// Sorts objects into apply order (stable, so template order is kept
/// within one Kind).
pub fn sort_by_kind(objects: &mut [Object]) {
    objects.sort_by_key(|o| kind_priority(get_kind(o)));
}

/// Sorts objects into deletion order (reverse apply order).
pub fn sort_by_kind_reversed(objects: &mut [Object]) {
    objects.sort_by_key(|o| std::cmp::Reverse(kind_priority(get_kind(o))));
}

pub fn get_kind(object: &Object) -> &str {
    get_str(object, "kind")
}

pub fn get_name(object: &Object) -> &str {
    metadata_str(object, "name")
}

pub fn get_namespace(object: &Object) -> &str {
    metadata_str(object, "namespace")
}

pub fn get_label<'a>(object: &'a Object, label: &str) -> &'a str {
    object
        .get("metadata")
        .and_then(Value::as_mapping)
        .and_then(|m| m.get("labels"))
        .and_then(Value::as_mapping)
        .and_then(|labels| labels.get(label))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// The `status.phase` field, if the object carries one.
pub fn get_status_phase(object: &Object) -> Option<&str> {
    object
        .get("status")
        .and_then(Value::as_mapping)
        .and_then(|status| status.get("phase"))
        .and_then(Value::as_str)
}

/// Whether the live object reports a terminating phase.
pub fn is_terminating(object: &Object) -> bool {
    get_status_phase(object) == Some("Terminating")
}

/// Builds the minimal `{kind, metadata: {namespace, name}}` stub used for
/// listing and deletion of discovered objects.
pub fn new_stub(kind: &str, namespace: &str, name: &str) -> Object {
    let mut metadata = Mapping::new();
    metadata.insert(Value::from("namespace"), Value::from(namespace));
    if !name.is_empty() {
        metadata.insert(Value::from("name"), Value::from(name));
    }
    let mut object = Mapping::new();
    object.insert(Value::from("kind"), Value::from(kind));
    object.insert(Value::from("metadata"), Value::Mapping(metadata));
    object
}

fn get_str<'a>(object: &'a Object, field: &str) -> &'a str {
    object.get(field).and_then(Value::as_str).unwrap_or_default()
}

fn metadata_str<'a>(object: &'a Object, field: &str) -> &'a str {
    object
        .get("metadata")
        .and_then(Value::as_mapping)
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(kind: &str, name: &str) -> Object {
        new_stub(kind, "john-che", name)
    }

    #[test]
    fn stub_exposes_coordinates() {
        let pod = new_stub(KIND_POD, "john-che", "deploy-1");
        assert_eq!(get_kind(&pod), "Pod");
        assert_eq!(get_namespace(&pod), "john-che");
        assert_eq!(get_name(&pod), "deploy-1");
        assert_eq!(get_label(&pod, "version"), "");
    }

    #[test]
    fn apply_order_is_monotone_in_priority() {
        let mut objects = vec![
            obj(KIND_ROUTE, "r"),
            obj(KIND_SECRET, "s"),
            obj(KIND_PROJECT_REQUEST, "p"),
            obj("SomethingNew", "x"),
            obj(KIND_RESOURCE_QUOTA, "q"),
            obj(KIND_LIMIT_RANGE, "l"),
        ];
        sort_by_kind(&mut objects);
        let priorities: Vec<i32> = objects.iter().map(|o| kind_priority(get_kind(o))).collect();
        assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(get_kind(&objects[0]), KIND_PROJECT_REQUEST);
        // unknown kinds sink to the back
        assert_eq!(get_kind(objects.last().unwrap()), "SomethingNew");
    }

    #[test]
    fn deletion_order_is_reversed() {
        let mut objects = vec![obj(KIND_PROJECT_REQUEST, "p"), obj(KIND_ROUTE, "r")];
        sort_by_kind_reversed(&mut objects);
        assert_eq!(get_kind(&objects[0]), KIND_ROUTE);
    }

    #[test]
    fn terminating_phase_is_detected() {
        let live: Object =
            serde_yaml::from_str("{kind: PersistentVolumeClaim, status: {phase: Terminating}}")
                .unwrap();
        assert!(is_terminating(&live));
        let bound: Object =
            serde_yaml::from_str("{kind: PersistentVolumeClaim, status: {phase: Bound}}").unwrap();
        assert!(!is_terminating(&bound));
    }
}
