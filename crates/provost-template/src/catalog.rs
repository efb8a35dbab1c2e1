//! The fixed catalog of template files per environment type, and the
//! per-file version bookkeeping the fleet updater works from.

use std::collections::BTreeMap;

use provost_core::models::{EnvType, TenantsUpdate};
use provost_core::{ProvostError, ProvostResult};

use crate::template::{Template, VAR_COMMIT, VAR_COMMIT_QUOTAS, VAR_DEPLOY_TYPE};

pub const FILE_USER: &str = "fabric8-tenant-user.yml";
pub const FILE_CHE_MT: &str = "fabric8-tenant-che-mt.yml";
pub const FILE_CHE_QUOTAS: &str = "fabric8-tenant-che-quotas.yml";
pub const FILE_JENKINS: &str = "fabric8-tenant-jenkins.yml";
pub const FILE_JENKINS_QUOTAS: &str = "fabric8-tenant-jenkins-quotas.yml";
pub const FILE_DEPLOY: &str = "fabric8-tenant-deploy.yml";

/// The published version of every template file, fixed per deployment of
/// the service.
#[derive(Debug, Clone)]
pub struct TemplateVersions {
    pub user: String,
    pub che: String,
    pub che_quotas: String,
    pub jenkins: String,
    pub jenkins_quotas: String,
    pub deploy: String,
}

impl TemplateVersions {
    /// One version for every file; convenient in tests.
    pub fn uniform(version: &str) -> Self {
        Self {
            user: version.into(),
            che: version.into(),
            che_quotas: version.into(),
            jenkins: version.into(),
            jenkins_quotas: version.into(),
            deploy: version.into(),
        }
    }
}

/// Environment data for one `(tenant, envType)` pair: the templates that
/// materialize it.
#[derive(Debug, Clone)]
pub struct EnvData {
    pub env_type: EnvType,
    pub templates: Vec<Template>,
}

impl EnvData {
    /// The bundle version recorded on a namespace row: every template
    /// version joined by `_`.
    pub fn version(&self) -> String {
        self.templates
            .iter()
            .map(|t| t.version.as_str())
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// The template files feeding one environment type, with their bound
/// defaults. Both `run` and `stage` come from the deploy template,
/// distinguished by the `DEPLOY_TYPE` variable.
pub fn templates_for(
    env_type: EnvType,
    versions: &TemplateVersions,
) -> ProvostResult<Vec<Template>> {
    let templates = match env_type {
        EnvType::User => vec![Template::new(
            FILE_USER,
            commit_params(&versions.user, None),
            &versions.user,
        )],
        EnvType::Che => vec![
            Template::new(
                FILE_CHE_MT,
                commit_params(&versions.che, Some(&versions.che_quotas)),
                &versions.che,
            ),
            Template::new(
                FILE_CHE_QUOTAS,
                commit_params(&versions.che, Some(&versions.che_quotas)),
                &versions.che_quotas,
            ),
        ],
        EnvType::Jenkins => vec![
            Template::new(
                FILE_JENKINS,
                commit_params(&versions.jenkins, Some(&versions.jenkins_quotas)),
                &versions.jenkins,
            ),
            Template::new(
                FILE_JENKINS_QUOTAS,
                commit_params(&versions.jenkins, Some(&versions.jenkins_quotas)),
                &versions.jenkins_quotas,
            ),
        ],
        EnvType::Run | EnvType::Stage => {
            let mut params = commit_params(&versions.deploy, None);
            params.insert(VAR_DEPLOY_TYPE.to_string(), env_type.as_str().to_string());
            vec![Template::new(FILE_DEPLOY, params, &versions.deploy)]
        }
        other => {
            return Err(ProvostError::validation(format!(
                "no templates are defined for environment type '{other}'"
            )))
        }
    };
    Ok(templates)
}

/// The expected bundle version per environment type, used to decide
/// which namespaces are outdated.
pub fn mapped_versions(versions: &TemplateVersions) -> BTreeMap<EnvType, String> {
    let mut mapped = BTreeMap::new();
    for env_type in provost_core::models::DEFAULT_ENV_TYPES {
        // templates_for covers every default env type
        if let Ok(templates) = templates_for(env_type, versions) {
            let env_data = EnvData {
                env_type,
                templates,
            };
            mapped.insert(env_type, env_data.version());
        }
    }
    mapped
}

fn commit_params(version: &str, quotas_version: Option<&str>) -> BTreeMap<String, String> {
    let mut params = BTreeMap::from([(VAR_COMMIT.to_string(), version.to_string())]);
    if let Some(quotas) = quotas_version {
        params.insert(VAR_COMMIT_QUOTAS.to_string(), quotas.to_string());
    }
    params
}

/// Version bookkeeping for one template file: which envTypes it feeds
/// and how its applied version is stored on the update singleton.
#[derive(Debug, Clone)]
pub struct VersionManager {
    pub file_name: &'static str,
    pub version: String,
    pub env_types: Vec<EnvType>,
}

impl VersionManager {
    pub fn is_up_to_date(&self, update: &TenantsUpdate) -> bool {
        update.file_versions.get(self.file_name) == Some(&self.version)
    }

    /// Records this file's version as applied.
    pub fn set_current(&self, update: &mut TenantsUpdate) {
        update
            .file_versions
            .insert(self.file_name.to_string(), self.version.clone());
    }
}

/// One manager per known template file.
pub fn version_managers(versions: &TemplateVersions) -> Vec<VersionManager> {
    vec![
        manager(FILE_USER, &versions.user, vec![EnvType::User]),
        manager(FILE_CHE_MT, &versions.che, vec![EnvType::Che]),
        manager(FILE_CHE_QUOTAS, &versions.che_quotas, vec![EnvType::Che]),
        manager(FILE_JENKINS, &versions.jenkins, vec![EnvType::Jenkins]),
        manager(
            FILE_JENKINS_QUOTAS,
            &versions.jenkins_quotas,
            vec![EnvType::Jenkins],
        ),
        manager(
            FILE_DEPLOY,
            &versions.deploy,
            vec![EnvType::Stage, EnvType::Run],
        ),
    ]
}

fn manager(file_name: &'static str, version: &str, env_types: Vec<EnvType>) -> VersionManager {
    VersionManager {
        file_name,
        version: version.to_string(),
        env_types,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_version_joins_template_versions() {
        let mut versions = TemplateVersions::uniform("123abc");
        versions.jenkins_quotas = "456def".into();
        let env_data = EnvData {
            env_type: EnvType::Jenkins,
            templates: templates_for(EnvType::Jenkins, &versions).unwrap(),
        };
        assert_eq!(env_data.version(), "123abc_456def");
    }

    #[test]
    fn run_and_stage_share_the_deploy_template() {
        let versions = TemplateVersions::uniform("1");
        for env_type in [EnvType::Run, EnvType::Stage] {
            let templates = templates_for(env_type, &versions).unwrap();
            assert_eq!(templates.len(), 1);
            assert_eq!(templates[0].filename, FILE_DEPLOY);
            assert_eq!(
                templates[0].default_params.get(VAR_DEPLOY_TYPE),
                Some(&env_type.as_str().to_string())
            );
        }
    }

    #[test]
    fn custom_env_type_has_no_templates() {
        let versions = TemplateVersions::uniform("1");
        assert!(templates_for(EnvType::Custom, &versions).is_err());
    }

    #[test]
    fn mapped_versions_cover_all_default_types() {
        let versions = TemplateVersions::uniform("9");
        let mapped = mapped_versions(&versions);
        assert_eq!(mapped.len(), provost_core::models::DEFAULT_ENV_TYPES.len());
        assert_eq!(mapped.get(&EnvType::Jenkins), Some(&"9_9".to_string()));
        assert_eq!(mapped.get(&EnvType::User), Some(&"9".to_string()));
    }

    #[test]
    fn version_managers_track_the_update_row() {
        let versions = TemplateVersions::uniform("2.0.85");
        let managers = version_managers(&versions);
        assert_eq!(managers.len(), 6);

        let mut update = TenantsUpdate::default();
        assert!(managers.iter().all(|m| !m.is_up_to_date(&update)));
        for manager in &managers {
            manager.set_current(&mut update);
        }
        assert!(managers.iter().all(|m| m.is_up_to_date(&update)));
    }
}
