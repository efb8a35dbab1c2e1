//! Target cluster description and the per-envType cluster mapping.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ProvostError, ProvostResult};
use crate::models::namespace::EnvType;

/// A remote cluster API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Base URL of the cluster API server, e.g. `https://api.cluster1/`.
    pub api_url: String,
    /// The privileged cluster-side user provisioning acts as.
    pub master_user: String,
    /// Console URL advertised to users, if any.
    pub console_url: Option<String>,
}

impl Cluster {
    pub fn new(api_url: impl Into<String>, master_user: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            master_user: master_user.into(),
            console_url: None,
        }
    }
}

/// Resolves the target cluster for an environment type.
///
/// Built by the caller either from the user's assigned cluster (Setup) or
/// from the clusters recorded on the existing namespace rows (Update,
/// Delete, Clean).
#[derive(Debug, Clone, Default)]
pub struct ClusterMapping {
    clusters: Arc<BTreeMap<EnvType, Cluster>>,
}

impl ClusterMapping {
    pub fn new(clusters: BTreeMap<EnvType, Cluster>) -> Self {
        Self {
            clusters: Arc::new(clusters),
        }
    }

    /// A mapping that assigns the same cluster to every environment type.
    pub fn uniform(cluster: Cluster) -> Self {
        let mut clusters = BTreeMap::new();
        for env_type in crate::models::namespace::DEFAULT_ENV_TYPES {
            clusters.insert(env_type, cluster.clone());
        }
        Self::new(clusters)
    }

    pub fn for_type(&self, env_type: EnvType) -> ProvostResult<&Cluster> {
        self.clusters
            .get(&env_type)
            .ok_or_else(|| ProvostError::internal(format!("no cluster mapped for {env_type}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_mapping_covers_default_types() {
        let mapping = ClusterMapping::uniform(Cluster::new("https://c1", "sre"));
        for env_type in crate::models::DEFAULT_ENV_TYPES {
            assert_eq!(mapping.for_type(env_type).unwrap().api_url, "https://c1");
        }
    }

    #[test]
    fn missing_type_is_an_error() {
        let mapping = ClusterMapping::new(BTreeMap::new());
        assert!(mapping.for_type(EnvType::User).is_err());
    }
}
