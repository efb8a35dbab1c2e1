//! Per-(tenant, envType) environment resolution.
//!
//! An [`EnvironmentTypeService`] knows, for one environment type of one
//! tenant, which cluster to talk to, what the namespace is called, and
//! which template objects materialize it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use provost_cluster::token::{unverified_subject, TokenProducer};
use provost_core::models::{Cluster, ClusterMapping, EnvType};
use provost_core::object::{self, Object};
use provost_core::{ProvostError, ProvostResult};
use provost_template::{templates_for, EnvData, TemplateLoader, TemplateVersions};
use tracing::warn;

use crate::config::EngineConfig;

/// Everything one tenant request carries into the engine.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<EngineConfig>,
    pub clusters: ClusterMapping,
    pub os_username: String,
    pub ns_base_name: String,
    /// The tenant's raw token, mined for identity template variables.
    pub user_token: Option<String>,
    pub token_producer: TokenProducer,
    pub request_id: String,
}

impl ServiceContext {
    /// The same context addressing a different base name; used by the
    /// Create healing strategy after a collision.
    pub fn with_ns_base_name(&self, ns_base_name: impl Into<String>) -> Self {
        let mut context = self.clone();
        context.ns_base_name = ns_base_name.into();
        context
    }
}

/// One environment type of one tenant.
pub struct EnvironmentTypeService<L> {
    env_type: EnvType,
    context: Arc<ServiceContext>,
    loader: Arc<L>,
}

impl<L: TemplateLoader> EnvironmentTypeService<L> {
    pub fn new(env_type: EnvType, context: Arc<ServiceContext>, loader: Arc<L>) -> Self {
        Self {
            env_type,
            context,
            loader,
        }
    }

    pub fn env_type(&self) -> EnvType {
        self.env_type
    }

    pub fn namespace_name(&self) -> String {
        self.env_type.namespace_name(&self.context.ns_base_name)
    }

    pub fn cluster(&self) -> ProvostResult<&Cluster> {
        self.context.clusters.for_type(self.env_type)
    }

    /// Loads and processes the current template bundle.
    pub async fn env_data_and_objects(&self) -> ProvostResult<(EnvData, Vec<Object>)> {
        self.load_bundle(&self.context.config.template_versions)
            .await
    }

    /// Processes the template bundle of a previously applied version,
    /// reconstructed from the version string recorded on the namespace.
    pub async fn objects_for_version(&self, bundle_version: &str) -> ProvostResult<Vec<Object>> {
        let versions = self.versions_for_bundle(bundle_version)?;
        let (_, objects) = self.load_bundle(&versions).await?;
        Ok(objects)
    }

    /// Objects of the previous bundle absent from the current one,
    /// compared by `(kind, name)` within the namespace.
    pub async fn missing_objects_comparing_with(
        &self,
        previous_version: &str,
        current: &[Object],
    ) -> ProvostResult<Vec<Object>> {
        let previous = self.objects_for_version(previous_version).await?;
        let current_keys: std::collections::BTreeSet<(String, String)> = current
            .iter()
            .map(|o| (object::get_kind(o).to_string(), object::get_name(o).to_string()))
            .collect();
        Ok(previous
            .into_iter()
            .filter(|o| {
                !current_keys.contains(&(
                    object::get_kind(o).to_string(),
                    object::get_name(o).to_string(),
                ))
            })
            .collect())
    }

    /// A secondary object some actions must attach or strip. For the
    /// `user` environment the cluster materializes a legacy `admin`
    /// RoleBinding along with the project; it must be removed again, so
    /// it is exposed with `should_be_added == false`.
    pub fn additional_object(&self) -> Option<(Object, bool)> {
        if self.env_type != EnvType::User {
            return None;
        }
        let binding = object::new_stub(
            object::KIND_ROLE_BINDING,
            &self.context.ns_base_name,
            "admin",
        );
        Some((binding, false))
    }

    async fn load_bundle(
        &self,
        versions: &TemplateVersions,
    ) -> ProvostResult<(EnvData, Vec<Object>)> {
        let mut templates = templates_for(self.env_type, versions)?;
        for template in &mut templates {
            template.content = self
                .loader
                .load(&template.filename, &template.version)
                .await?;
        }

        let vars = self.template_vars()?;
        let mut objects = Vec::new();
        for template in &templates {
            objects.extend(template.process(&vars)?);
        }
        object::sort_by_kind(&mut objects);

        Ok((
            EnvData {
                env_type: self.env_type,
                templates,
            },
            objects,
        ))
    }

    fn template_vars(&self) -> ProvostResult<BTreeMap<String, String>> {
        let master_user = self
            .cluster()
            .map(|c| c.master_user.clone())
            .unwrap_or_else(|_| self.context.config.master_user.clone());
        let mut vars = provost_template::collect_vars(
            &self.context.os_username,
            &self.context.ns_base_name,
            &master_user,
        );
        if self.env_type == EnvType::Che {
            self.add_che_identity_vars(&mut vars)?;
        }
        Ok(vars)
    }

    /// The `che` template interpolates the caller's identity: the raw
    /// token, its subject, the request id and a job id.
    fn add_che_identity_vars(&self, vars: &mut BTreeMap<String, String>) -> ProvostResult<()> {
        if let Some(token) = &self.context.user_token {
            vars.insert("OSIO_TOKEN".to_string(), token.clone());
            vars.insert("IDENTITY_ID".to_string(), unverified_subject(token)?);
        }
        vars.insert("REQUEST_ID".to_string(), self.context.request_id.clone());
        vars.insert(
            "JOB_ID".to_string(),
            Utc::now().timestamp_millis().to_string(),
        );
        Ok(())
    }

    /// Splits a recorded bundle version back into per-file versions.
    /// The bundle is the `_`-joined versions of the env type's template
    /// files in catalog order.
    fn versions_for_bundle(&self, bundle_version: &str) -> ProvostResult<TemplateVersions> {
        let current = templates_for(self.env_type, &self.context.config.template_versions)?;
        let parts: Vec<&str> = bundle_version.split('_').collect();
        if parts.len() != current.len() {
            warn!(
                env_type = %self.env_type,
                %bundle_version,
                "recorded version does not match the template bundle layout"
            );
            return Err(ProvostError::validation(format!(
                "version '{bundle_version}' does not map onto {} template file(s)",
                current.len()
            )));
        }

        let mut versions = self.context.config.template_versions.clone();
        for (template, part) in current.iter().zip(parts) {
            let slot = match template.filename.as_str() {
                provost_template::catalog::FILE_USER => &mut versions.user,
                provost_template::catalog::FILE_CHE_MT => &mut versions.che,
                provost_template::catalog::FILE_CHE_QUOTAS => &mut versions.che_quotas,
                provost_template::catalog::FILE_JENKINS => &mut versions.jenkins,
                provost_template::catalog::FILE_JENKINS_QUOTAS => &mut versions.jenkins_quotas,
                provost_template::catalog::FILE_DEPLOY => &mut versions.deploy,
                other => {
                    return Err(ProvostError::internal(format!(
                        "template file '{other}' has no version slot"
                    )))
                }
            };
            *slot = part.to_string();
        }
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provost_core::models::ClusterMapping;
    use provost_core::object::get_kind;
    use provost_template::catalog::{FILE_JENKINS, FILE_JENKINS_QUOTAS};
    use provost_template::StaticLoader;

    fn context() -> Arc<ServiceContext> {
        Arc::new(ServiceContext {
            config: Arc::new(EngineConfig {
                template_versions: TemplateVersions::uniform("2"),
                ..EngineConfig::default()
            }),
            clusters: ClusterMapping::uniform(Cluster::new("https://c1", "dsaas-admin")),
            os_username: "john@example.com".into(),
            ns_base_name: "john".into(),
            user_token: None,
            token_producer: provost_cluster::token::static_token_producer("u", "m"),
            request_id: "req-1".into(),
        })
    }

    #[tokio::test]
    async fn bundle_is_loaded_processed_and_sorted() {
        let loader = Arc::new(
            StaticLoader::default()
                .with(
                    FILE_JENKINS,
                    "kind: Template\nobjects:\n- kind: Route\n  metadata:\n    name: jenkins\n    namespace: ${USER_NAME}-jenkins\n- kind: ProjectRequest\n  metadata:\n    name: ${USER_NAME}-jenkins\n",
                )
                .with(
                    FILE_JENKINS_QUOTAS,
                    "kind: ResourceQuota\nmetadata:\n  name: quota\n  namespace: ${USER_NAME}-jenkins\n",
                ),
        );
        let service = EnvironmentTypeService::new(EnvType::Jenkins, context(), loader);

        assert_eq!(service.namespace_name(), "john-jenkins");
        let (env_data, objects) = service.env_data_and_objects().await.unwrap();
        assert_eq!(env_data.version(), "2_2");
        let kinds: Vec<&str> = objects.iter().map(get_kind).collect();
        assert_eq!(kinds, vec!["ProjectRequest", "ResourceQuota", "Route"]);
    }

    #[tokio::test]
    async fn missing_objects_are_diffed_by_kind_and_name() {
        let loader = Arc::new(
            StaticLoader::default()
                // current version 2: route gone
                .with_versioned(
                    FILE_JENKINS,
                    "2",
                    "kind: Template\nobjects:\n- kind: ConfigMap\n  metadata:\n    name: settings\n",
                )
                .with_versioned(FILE_JENKINS_QUOTAS, "2", "kind: List\nitems: []\n")
                // previous version 1: had the route
                .with_versioned(
                    FILE_JENKINS,
                    "1",
                    "kind: Template\nobjects:\n- kind: ConfigMap\n  metadata:\n    name: settings\n- kind: Route\n  metadata:\n    name: r1\n",
                )
                .with_versioned(FILE_JENKINS_QUOTAS, "1", "kind: List\nitems: []\n"),
        );
        let service = EnvironmentTypeService::new(EnvType::Jenkins, context(), loader);

        let (_, current) = service.env_data_and_objects().await.unwrap();
        let missing = service
            .missing_objects_comparing_with("1_1", &current)
            .await
            .unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(get_kind(&missing[0]), "Route");
        assert_eq!(object::get_name(&missing[0]), "r1");
    }

    #[tokio::test]
    async fn malformed_bundle_version_is_rejected() {
        let loader = Arc::new(StaticLoader::default());
        let service = EnvironmentTypeService::new(EnvType::Jenkins, context(), loader);
        assert!(service.objects_for_version("only-one-part").await.is_err());
    }

    #[test]
    fn only_the_user_environment_carries_the_admin_binding() {
        let loader = Arc::new(StaticLoader::default());
        let user = EnvironmentTypeService::new(EnvType::User, context(), loader.clone());
        let (binding, should_add) = user.additional_object().unwrap();
        assert_eq!(get_kind(&binding), "RoleBinding");
        assert_eq!(object::get_name(&binding), "admin");
        assert_eq!(object::get_namespace(&binding), "john");
        assert!(!should_add);

        let che = EnvironmentTypeService::new(EnvType::Che, context(), loader);
        assert!(che.additional_object().is_none());
    }
}
