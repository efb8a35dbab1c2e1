//! Namespace domain model: one environment of a tenant on one cluster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProvostError, ProvostResult};

/// Logical role of a namespace within a tenant workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvType {
    User,
    Jenkins,
    Che,
    Run,
    Stage,
    Test,
    Custom,
}

/// The environment types materialized by a plain Setup request.
pub const DEFAULT_ENV_TYPES: [EnvType; 5] = [
    EnvType::Che,
    EnvType::Jenkins,
    EnvType::User,
    EnvType::Run,
    EnvType::Stage,
];

impl EnvType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvType::User => "user",
            EnvType::Jenkins => "jenkins",
            EnvType::Che => "che",
            EnvType::Run => "run",
            EnvType::Stage => "stage",
            EnvType::Test => "test",
            EnvType::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> ProvostResult<Self> {
        match value {
            "user" => Ok(EnvType::User),
            "jenkins" => Ok(EnvType::Jenkins),
            "che" => Ok(EnvType::Che),
            "run" => Ok(EnvType::Run),
            "stage" => Ok(EnvType::Stage),
            "test" => Ok(EnvType::Test),
            "custom" => Ok(EnvType::Custom),
            other => Err(ProvostError::validation(format!(
                "unknown environment type '{other}'"
            ))),
        }
    }

    /// The namespace name this environment type gets for a tenant with the
    /// given base name: the base itself for `user`, `base-type` otherwise.
    pub fn namespace_name(&self, ns_base_name: &str) -> String {
        match self {
            EnvType::User => ns_base_name.to_string(),
            other => format!("{ns_base_name}-{}", other.as_str()),
        }
    }

    /// Infers the environment type from an existing namespace name.
    pub fn from_namespace_name(name: &str, ns_base_name: &str) -> Self {
        if name == ns_base_name {
            return EnvType::User;
        }
        for env_type in [
            EnvType::Jenkins,
            EnvType::Che,
            EnvType::Test,
            EnvType::Stage,
            EnvType::Run,
        ] {
            if name.ends_with(&format!("-{}", env_type.as_str())) {
                return env_type;
            }
        }
        EnvType::Custom
    }
}

impl std::fmt::Display for EnvType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a namespace row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceState {
    Provisioning,
    Updating,
    Ready,
    Failed,
}

impl NamespaceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceState::Provisioning => "provisioning",
            NamespaceState::Updating => "updating",
            NamespaceState::Ready => "ready",
            NamespaceState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for NamespaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single namespace owned by a [`Tenant`](crate::models::Tenant).
///
/// `version` is the concatenated version of the template bundle the
/// namespace was last successfully materialized with; `updated_by` records
/// the service revision that performed the transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub env_type: EnvType,
    pub name: String,
    pub cluster_url: String,
    pub version: String,
    pub state: NamespaceState,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Namespace {
    pub fn new(
        tenant_id: Uuid,
        env_type: EnvType,
        name: impl Into<String>,
        cluster_url: impl Into<String>,
        state: NamespaceState,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            env_type,
            name: name.into(),
            cluster_url: cluster_url.into(),
            version: String::new(),
            state,
            updated_by: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The requested environment types that have no namespace row yet.
///
/// Setup over a partially provisioned or failed tenant only retries
/// these, which is what makes a repeated Setup idempotent.
pub fn missing_env_types(namespaces: &[Namespace], requested: &[EnvType]) -> Vec<EnvType> {
    requested
        .iter()
        .copied()
        .filter(|env_type| namespaces.iter().all(|ns| ns.env_type != *env_type))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_namespace_is_the_bare_base_name() {
        assert_eq!(EnvType::User.namespace_name("alice"), "alice");
        assert_eq!(EnvType::Che.namespace_name("alice"), "alice-che");
        assert_eq!(EnvType::Jenkins.namespace_name("alice"), "alice-jenkins");
    }

    #[test]
    fn env_type_round_trips_through_names() {
        for env_type in DEFAULT_ENV_TYPES {
            let name = env_type.namespace_name("bob");
            assert_eq!(EnvType::from_namespace_name(&name, "bob"), env_type);
        }
    }

    #[test]
    fn unrecognized_suffix_is_custom() {
        assert_eq!(
            EnvType::from_namespace_name("bob-preview", "bob"),
            EnvType::Custom
        );
    }

    #[test]
    fn parse_rejects_unknown_types() {
        assert!(EnvType::parse("user").is_ok());
        assert!(EnvType::parse("production").is_err());
    }

    #[test]
    fn missing_types_skip_already_provisioned_namespaces() {
        let tenant_id = uuid::Uuid::new_v4();
        let existing = vec![
            Namespace::new(tenant_id, EnvType::User, "bob", "https://c1", NamespaceState::Ready),
            Namespace::new(
                tenant_id,
                EnvType::Che,
                "bob-che",
                "https://c1",
                NamespaceState::Failed,
            ),
        ];
        let missing = missing_env_types(&existing, &DEFAULT_ENV_TYPES);
        assert_eq!(missing, vec![EnvType::Jenkins, EnvType::Run, EnvType::Stage]);
        assert!(missing_env_types(&existing, &[EnvType::User]).is_empty());
    }
}
