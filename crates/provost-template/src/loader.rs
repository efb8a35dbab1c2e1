//! Template retrieval.
//!
//! Template files live either in a local directory shipped with the
//! service or behind a raw-file URL of the form
//! `{repo}/{version}/{dir}/{filename}`. Loaders take the wanted version
//! so the updater can reprocess the bundle a namespace was last applied
//! with.

use std::collections::BTreeMap;
use std::path::PathBuf;

use provost_core::{ProvostError, ProvostResult};
use tracing::debug;

const DEFAULT_TEMPLATES_REPO: &str =
    "https://raw.githubusercontent.com/fabric8-services/fabric8-tenant";
const DEFAULT_TEMPLATES_DIR: &str = "environment/templates";

/// Returns raw template text keyed by filename and version.
pub trait TemplateLoader: Send + Sync {
    fn load(
        &self,
        filename: &str,
        version: &str,
    ) -> impl Future<Output = ProvostResult<String>> + Send;
}

/// Loads templates from a local directory. The directory holds exactly
/// one (the current) version of every file, so the version is ignored.
#[derive(Debug, Clone)]
pub struct FileLoader {
    dir: PathBuf,
}

impl FileLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl TemplateLoader for FileLoader {
    async fn load(&self, filename: &str, _version: &str) -> ProvostResult<String> {
        let path = self.dir.join(filename);
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            ProvostError::internal(format!(
                "reading template file {} failed: {e}",
                path.display()
            ))
        })
    }
}

/// Fetches templates from a raw-file URL `{repo}/{version}/{dir}/{filename}`.
///
/// An empty repo falls back to the known upstream; a `github.com` repo
/// URL is rewritten to its raw-content host.
#[derive(Debug, Clone)]
pub struct RawUrlLoader {
    http: reqwest::Client,
    repo: String,
    dir: String,
}

impl RawUrlLoader {
    pub fn new(http: reqwest::Client, repo: impl Into<String>, dir: impl Into<String>) -> Self {
        Self {
            http,
            repo: repo.into(),
            dir: dir.into(),
        }
    }

    fn repo_url(&self) -> String {
        let repo = self.repo.trim();
        if repo.is_empty() {
            return DEFAULT_TEMPLATES_REPO.to_string();
        }
        if repo.contains("github.com") {
            return repo.replacen("github.com", "raw.githubusercontent.com", 1);
        }
        repo.to_string()
    }

    fn file_url(&self, filename: &str, version: &str) -> String {
        let dir = self.dir.trim();
        let dir = if dir.is_empty() { DEFAULT_TEMPLATES_DIR } else { dir };
        format!(
            "{}/{version}/{}/{filename}",
            self.repo_url().trim_end_matches('/'),
            dir.trim_matches('/'),
        )
    }
}

impl TemplateLoader for RawUrlLoader {
    async fn load(&self, filename: &str, version: &str) -> ProvostResult<String> {
        let url = self.file_url(filename, version);
        debug!(%url, "fetching template");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ProvostError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProvostError::HttpStatus {
                verb: "GET".into(),
                url,
                code: response.status().as_u16(),
            });
        }
        response
            .text()
            .await
            .map_err(|e| ProvostError::Transport(e.to_string()))
    }
}

/// A fixed in-memory template set; used by tests and as the bundled
/// fallback. Version-specific entries win over the plain filename.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    templates: BTreeMap<String, String>,
}

impl StaticLoader {
    pub fn new(templates: BTreeMap<String, String>) -> Self {
        Self { templates }
    }

    /// Registers content served for the file at any version.
    pub fn with(mut self, filename: impl Into<String>, content: impl Into<String>) -> Self {
        self.templates.insert(filename.into(), content.into());
        self
    }

    /// Registers content served only for one specific version.
    pub fn with_versioned(
        mut self,
        filename: &str,
        version: &str,
        content: impl Into<String>,
    ) -> Self {
        self.templates
            .insert(format!("{filename}@{version}"), content.into());
        self
    }
}

impl TemplateLoader for StaticLoader {
    async fn load(&self, filename: &str, version: &str) -> ProvostResult<String> {
        self.templates
            .get(&format!("{filename}@{version}"))
            .or_else(|| self.templates.get(filename))
            .cloned()
            .ok_or_else(|| ProvostError::NotFound {
                entity: "template".into(),
                id: format!("{filename}@{version}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn github_repo_urls_are_rewritten_to_raw_host() {
        let loader = RawUrlLoader::new(
            reqwest::Client::new(),
            "https://github.com/acme/templates",
            "",
        );
        assert_eq!(
            loader.file_url("fabric8-tenant-user.yml", "12345"),
            "https://raw.githubusercontent.com/acme/templates/12345/\
             environment/templates/fabric8-tenant-user.yml"
        );
    }

    #[test]
    fn empty_repo_falls_back_to_the_upstream() {
        let loader = RawUrlLoader::new(reqwest::Client::new(), "", "tpl");
        assert_eq!(
            loader.file_url("f.yml", "abc"),
            format!("{DEFAULT_TEMPLATES_REPO}/abc/tpl/f.yml")
        );
    }

    #[tokio::test]
    async fn raw_url_loader_fetches_the_versioned_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blob123/tpl/fabric8-tenant-user.yml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("kind: Template"))
            .mount(&server)
            .await;

        let loader = RawUrlLoader::new(reqwest::Client::new(), server.uri(), "tpl");
        let content = loader
            .load("fabric8-tenant-user.yml", "blob123")
            .await
            .unwrap();
        assert_eq!(content, "kind: Template");
    }

    #[tokio::test]
    async fn missing_remote_template_is_an_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let loader = RawUrlLoader::new(reqwest::Client::new(), server.uri(), "d");
        assert!(loader.load("nope.yml", "b").await.is_err());
    }

    #[tokio::test]
    async fn static_loader_prefers_the_versioned_entry() {
        let loader = StaticLoader::default()
            .with("a.yml", "kind: List")
            .with_versioned("a.yml", "old", "kind: Template");
        assert_eq!(loader.load("a.yml", "new").await.unwrap(), "kind: List");
        assert_eq!(loader.load("a.yml", "old").await.unwrap(), "kind: Template");
        assert!(loader.load("b.yml", "x").await.is_err());
    }
}
