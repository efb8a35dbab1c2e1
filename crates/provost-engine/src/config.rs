//! Engine configuration.
//!
//! Everything process-wide — the revision tag recorded on namespace
//! transitions, template file versions, pool sizes and timeouts — is
//! explicit configuration read once at startup and passed to
//! constructors.

use std::time::Duration;

use provost_template::TemplateVersions;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Revision tag of this service build; recorded as `updated_by` on
    /// every namespace transition.
    pub commit: String,
    /// Fallback cluster-side admin user when a cluster entry carries none.
    pub master_user: String,
    /// Published versions of the template files.
    pub template_versions: TemplateVersions,
    /// Outdated tenants fetched per scheduler batch.
    pub batch_size: usize,
    /// Upper bound on concurrently updated tenants.
    pub worker_cap: usize,
    /// An `updating` row older than this is assumed stale and taken over.
    pub stuck_timeout: chrono::Duration,
    /// How long a scheduler waits for the Single-Flight Mutex.
    pub lock_timeout: Duration,
    /// Sleep between per-tenant update retries in the scheduler.
    pub update_retry_sleep: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit: "unknown".into(),
            master_user: "provost-admin".into(),
            template_versions: TemplateVersions::uniform("latest"),
            batch_size: 5,
            worker_cap: 10,
            stuck_timeout: chrono::Duration::minutes(9),
            lock_timeout: Duration::from_secs(3),
            update_retry_sleep: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Reads the configuration from `PROVOST_*` environment variables,
    /// falling back to the defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let versions = TemplateVersions {
            user: env_or("PROVOST_TEMPLATE_VERSION_USER", &defaults.template_versions.user),
            che: env_or("PROVOST_TEMPLATE_VERSION_CHE", &defaults.template_versions.che),
            che_quotas: env_or(
                "PROVOST_TEMPLATE_VERSION_CHE_QUOTAS",
                &defaults.template_versions.che_quotas,
            ),
            jenkins: env_or(
                "PROVOST_TEMPLATE_VERSION_JENKINS",
                &defaults.template_versions.jenkins,
            ),
            jenkins_quotas: env_or(
                "PROVOST_TEMPLATE_VERSION_JENKINS_QUOTAS",
                &defaults.template_versions.jenkins_quotas,
            ),
            deploy: env_or(
                "PROVOST_TEMPLATE_VERSION_DEPLOY",
                &defaults.template_versions.deploy,
            ),
        };
        Self {
            commit: env_or("PROVOST_COMMIT", &defaults.commit),
            master_user: env_or("PROVOST_MASTER_USER", &defaults.master_user),
            template_versions: versions,
            batch_size: env_parsed("PROVOST_UPDATE_BATCH_SIZE", defaults.batch_size),
            worker_cap: env_parsed("PROVOST_UPDATE_WORKER_CAP", defaults.worker_cap),
            stuck_timeout: chrono::Duration::seconds(env_parsed(
                "PROVOST_UPDATE_STUCK_TIMEOUT_SECS",
                defaults.stuck_timeout.num_seconds(),
            )),
            lock_timeout: Duration::from_secs(env_parsed(
                "PROVOST_LOCK_TIMEOUT_SECS",
                defaults.lock_timeout.as_secs(),
            )),
            update_retry_sleep: Duration::from_secs(env_parsed(
                "PROVOST_UPDATE_RETRY_SLEEP_SECS",
                defaults.update_retry_sleep.as_secs(),
            )),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.worker_cap, 10);
        assert_eq!(config.stuck_timeout, chrono::Duration::minutes(9));
    }
}
