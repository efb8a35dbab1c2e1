//! Thin verb-level HTTP client for cluster API servers.
//!
//! The client is stateless and reusable: it serializes an object to YAML,
//! resolves the URL from a [`MethodDefinition`], attaches the bearer token
//! produced by the [`TokenProducer`] and returns the raw response. It
//! never retries; protocol recovery lives in the hooks.

use provost_core::object::Object;
use provost_core::{ProvostError, ProvostResult};
use tracing::debug;

use crate::endpoints::{MethodDefinition, Verb};
use crate::token::TokenProducer;

/// Raw result of one cluster call. Non-2xx statuses are data here, not
/// errors — [`check_http_code`] turns them into errors once the hooks had
/// their say.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub verb: Verb,
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parses the response body as a YAML/JSON object.
    pub fn parse_object(&self) -> ProvostResult<Object> {
        serde_yaml::from_slice(&self.body)
            .map_err(|e| ProvostError::validation(format!("unparsable response body: {e}")))
    }
}

/// Produces the `HTTPStatusError` for a non-2xx result.
pub fn check_http_code(result: &ApplyResult) -> ProvostResult<()> {
    if result.is_success() {
        return Ok(());
    }
    Err(ProvostError::HttpStatus {
        verb: result.verb.as_str().to_string(),
        url: result.url.clone(),
        code: result.status,
    })
}

/// A connection to one cluster API server.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    master_url: String,
    token_producer: TokenProducer,
}

impl Client {
    /// The transport is supplied by the caller so tests can point the
    /// client at a double.
    pub fn new(
        http: reqwest::Client,
        master_url: impl Into<String>,
        token_producer: TokenProducer,
    ) -> Self {
        Self {
            http,
            master_url: master_url.into(),
            token_producer,
        }
    }

    pub fn master_url(&self) -> &str {
        &self.master_url
    }

    /// Sends one request described by `method` for `object`.
    ///
    /// The bearer token is the privileged one when either the method
    /// definition demands it or the current action forces it globally.
    pub async fn perform(
        &self,
        method: &MethodDefinition,
        object: &Object,
        force_master_token: bool,
    ) -> ProvostResult<ApplyResult> {
        let http_method = match method.verb {
            Verb::Post => reqwest::Method::POST,
            Verb::Patch => reqwest::Method::PATCH,
            Verb::Delete => reqwest::Method::DELETE,
            Verb::Get => reqwest::Method::GET,
            Verb::EnsureDeletion => {
                return Err(ProvostError::internal(
                    "ENSURE_DELETION never reaches the transport",
                ))
            }
        };

        let url = format!(
            "{}{}",
            self.master_url.trim_end_matches('/'),
            method.render_path(object)
        );
        let token = (self.token_producer)(method.requires_master_token || force_master_token);

        let mut request = self
            .http
            .request(http_method, &url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json");

        if method.verb.has_body() {
            let body = serde_yaml::to_string(object)
                .map_err(|e| ProvostError::internal(format!("object serialization failed: {e}")))?;
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/yaml")
                .body(body);
        }

        debug!(verb = %method.verb, %url, "sending cluster request");
        let response = request
            .send()
            .await
            .map_err(|e| ProvostError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProvostError::Transport(e.to_string()))?
            .to_vec();

        Ok(ApplyResult {
            verb: method.verb,
            url,
            status,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::{object_endpoints, Verb};
    use crate::token::static_token_producer;
    use provost_core::object::{new_stub, KIND_CONFIG_MAP, KIND_ROLE_BINDING_RESTRICTION};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> Client {
        Client::new(
            reqwest::Client::new(),
            server.uri(),
            static_token_producer("user-token", "master-token"),
        )
    }

    #[tokio::test]
    async fn post_serializes_yaml_and_uses_user_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/john-che/configmaps"))
            .and(header("authorization", "Bearer user-token"))
            .and(header("content-type", "application/yaml"))
            .and(body_string_contains("kind: ConfigMap"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let object = new_stub(KIND_CONFIG_MAP, "john-che", "settings");
        let post = object_endpoints(KIND_CONFIG_MAP)
            .unwrap()
            .method(Verb::Post)
            .unwrap();

        let result = client.perform(post, &object, false).await.unwrap();
        assert!(result.is_success());
        assert!(check_http_code(&result).is_ok());
    }

    #[tokio::test]
    async fn master_token_is_used_when_the_method_requires_it() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oapi/v1/namespaces/john/rolebindingrestrictions"))
            .and(header("authorization", "Bearer master-token"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let object = new_stub(KIND_ROLE_BINDING_RESTRICTION, "john", "dsaas-user-access");
        let post = object_endpoints(KIND_ROLE_BINDING_RESTRICTION)
            .unwrap()
            .method(Verb::Post)
            .unwrap();

        let result = client.perform(post, &object, false).await.unwrap();
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn non_2xx_is_data_until_checked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let object = new_stub(KIND_CONFIG_MAP, "john-che", "settings");
        let get = object_endpoints(KIND_CONFIG_MAP)
            .unwrap()
            .method(Verb::Get)
            .unwrap();

        let result = client.perform(get, &object, false).await.unwrap();
        assert_eq!(result.status, 404);
        let err = check_http_code(&result).unwrap_err();
        assert!(err
            .to_string()
            .contains("server responded with status: 404 for the GET request"));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let client = Client::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            static_token_producer("u", "m"),
        );
        let object = new_stub(KIND_CONFIG_MAP, "john-che", "settings");
        let get = object_endpoints(KIND_CONFIG_MAP)
            .unwrap()
            .method(Verb::Get)
            .unwrap();

        let err = client.perform(get, &object, false).await.unwrap_err();
        assert!(matches!(err, ProvostError::Transport(_)));
    }
}
