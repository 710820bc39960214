//! HTTP provisioning engine client.
//!
//! Sends one JSON request per resource to the engine endpoint and reads the
//! outputs from the response. Retries are the engine's business.

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ProvisionError, Result};
use crate::outputs::Outputs;
use crate::resource::{ResolvedInputs, ResourceDescriptor};

use super::provisioner::Provisioner;

/// Default request timeout in seconds.
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 300;

/// Path appended to the engine endpoint.
const PROVISION_PATH: &str = "provision";

/// Provisioner talking to a remote engine over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProvisioner {
    client: Client,
    url: String,
    token: Option<String>,
    project: String,
    environment: String,
}

#[derive(Debug, Serialize)]
struct ProvisionRequest<'a> {
    project: &'a str,
    environment: &'a str,
    #[serde(rename = "type")]
    resource_type: &'a str,
    name: &'a str,
    inputs: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ProvisionResponse {
    #[serde(default)]
    outputs: Option<Outputs>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpProvisioner {
    /// Creates a client for the engine at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        project: impl Into<String>,
        environment: impl Into<String>,
    ) -> Result<Self> {
        Self::with_timeout(endpoint, token, project, environment, DEFAULT_ENGINE_TIMEOUT_SECS)
    }

    /// Creates a client with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(
        endpoint: &str,
        token: Option<String>,
        project: impl Into<String>,
        environment: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProvisionError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}/{PROVISION_PATH}", endpoint.trim_end_matches('/')),
            token: token.filter(|t| !t.is_empty()),
            project: project.into(),
            environment: environment.into(),
        })
    }

    /// URL requests are posted to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn provision(
        &self,
        descriptor: &ResourceDescriptor,
        inputs: &ResolvedInputs,
    ) -> std::result::Result<Outputs, ProvisionError> {
        let request = ProvisionRequest {
            project: &self.project,
            environment: &self.environment,
            resource_type: descriptor.resource_type().as_str(),
            name: descriptor.name(),
            inputs: &inputs.values,
        };
        trace!("POST {} for {}", self.url, descriptor);

        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request);
        if let Some(token) = &self.token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProvisionError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProvisionError::Unauthorized {
                message: String::from("Engine rejected the token"),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::api_error(status.as_u16(), body));
        }

        let body: ProvisionResponse =
            response
                .json()
                .await
                .map_err(|e| ProvisionError::InvalidResponse {
                    message: format!("Failed to parse response: {e}"),
                })?;

        if let Some(message) = body.error.filter(|m| !m.is_empty()) {
            return Err(ProvisionError::failed(descriptor.name(), message));
        }

        let outputs = body.outputs.ok_or_else(|| ProvisionError::InvalidResponse {
            message: format!("No outputs in response for '{}'", descriptor.name()),
        })?;

        debug!("Engine provisioned {} ({} outputs)", descriptor, outputs.len());
        Ok(outputs)
    }

    fn engine_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::InputValue;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry() -> (ResourceDescriptor, ResolvedInputs) {
        let descriptor = ResourceDescriptor::new("azure-native:containerregistry:Registry", "registry")
            .with_input("adminUserEnabled", InputValue::literal(true));
        let mut inputs = ResolvedInputs::default();
        inputs.values.insert(String::from("adminUserEnabled"), json!(true));
        (descriptor, inputs)
    }

    #[tokio::test]
    async fn test_provision_returns_outputs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/provision"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(json!({
                "project": "backstage",
                "environment": "dev",
                "type": "azure-native:containerregistry:Registry",
                "name": "registry",
                "inputs": { "adminUserEnabled": true },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "outputs": { "loginServer": "acr.azurecr.io" },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provisioner =
            HttpProvisioner::new(&format!("{}/", server.uri()), Some(String::from("tok")), "backstage", "dev").unwrap();
        let (descriptor, inputs) = registry();

        let outputs = provisioner.provision(&descriptor, &inputs).await.unwrap();
        assert_eq!(outputs["loginServer"], json!("acr.azurecr.io"));
    }

    #[tokio::test]
    async fn test_unauthorized_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provisioner = HttpProvisioner::new(&server.uri(), None, "backstage", "dev").unwrap();
        let (descriptor, inputs) = registry();

        let err = provisioner.provision(&descriptor, &inputs).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_engine_error_field_fails_resource() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "registry name already taken",
            })))
            .mount(&server)
            .await;

        let provisioner = HttpProvisioner::new(&server.uri(), None, "backstage", "dev").unwrap();
        let (descriptor, inputs) = registry();

        let err = provisioner.provision(&descriptor, &inputs).await.unwrap_err();
        match err {
            ProvisionError::Failed { resource, message } => {
                assert_eq!(resource, "registry");
                assert_eq!(message, "registry name already taken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let provisioner = HttpProvisioner::new(&server.uri(), None, "backstage", "dev").unwrap();
        let (descriptor, inputs) = registry();

        let err = provisioner.provision(&descriptor, &inputs).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Api { status: 503, ref message } if message == "maintenance"));
    }
}
