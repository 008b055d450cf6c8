//! HTTP client for the external authorization service

use super::{Actor, AuthorizationOracle, Capability, ProtectedResource};
use crate::config::AuthConfig;
use crate::error::{QuotaError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Authorization oracle backed by the auth service's HTTP API
pub struct HttpAuthorizationOracle {
    service_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpAuthorizationOracle {
    pub fn new(service_id: String, base_url: String) -> Self {
        Self {
            service_id,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            ..Self::new(config.service_id.clone(), config.service_url.clone())
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = self.endpoint(path);
        debug!("Auth service request: POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!("Auth service request failed with status {}: {}", status, error_text);
            return Err(QuotaError::Upstream(format!(
                "{} returned {}: {}",
                path, status, error_text
            )));
        }

        Ok(response.json().await?)
    }
}

#[derive(Debug, Serialize)]
struct PermissionCheckRequest<'a> {
    service_id: &'a str,
    actor: &'a Actor,
    resource_id: &'a str,
    requested_permissions: &'a [Capability],
}

#[derive(Debug, Deserialize)]
struct PermissionCheckResponse {
    success: bool,
    data: Option<PermissionResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermissionResult {
    #[serde(default)]
    granted_permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PermissionGrantRequest<'a> {
    service_id: &'a str,
    actor: &'a Actor,
    target_user_id: &'a str,
    resource_id: &'a str,
    permissions: &'a [Capability],
}

#[derive(Debug, Serialize)]
struct ResourceCreateRequest<'a> {
    service_id: &'a str,
    actor: &'a Actor,
    resource_id: &'a str,
    resource_type: &'a str,
    display_name: &'a str,
    description: &'a str,
    metadata: &'a str,
}

/// Envelope returned by grant and create calls
#[derive(Debug, Deserialize)]
struct Acknowledgement {
    success: bool,
    error: Option<String>,
}

impl Acknowledgement {
    fn into_result(self, what: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(QuotaError::Upstream(format!(
                "{} failed: {}",
                what,
                self.error.unwrap_or_else(|| "unknown error".to_string())
            )))
        }
    }
}

/// All requested capabilities must appear in the granted list
fn all_granted(requested: &[Capability], granted: &[String]) -> bool {
    requested
        .iter()
        .all(|cap| granted.iter().any(|g| g == cap.as_str()))
}

#[async_trait]
impl AuthorizationOracle for HttpAuthorizationOracle {
    async fn check_capability(
        &self,
        actor: &Actor,
        resource_id: &str,
        capabilities: &[Capability],
    ) -> Result<bool> {
        let request = PermissionCheckRequest {
            service_id: &self.service_id,
            actor,
            resource_id,
            requested_permissions: capabilities,
        };

        let response: PermissionCheckResponse =
            self.post("/api/v1/permission/check", &request).await?;

        if !response.success {
            debug!(
                user_id = %actor.user_id,
                resource_id = %resource_id,
                error = ?response.error,
                "Permission check denied"
            );
            return Ok(false);
        }

        Ok(response
            .data
            .map(|data| all_granted(capabilities, &data.granted_permissions))
            .unwrap_or(false))
    }

    async fn register_resource(&self, actor: &Actor, resource: &ProtectedResource) -> Result<()> {
        let request = ResourceCreateRequest {
            service_id: &self.service_id,
            actor,
            resource_id: &resource.resource_id,
            resource_type: &resource.resource_type,
            display_name: &resource.display_name,
            description: &resource.description,
            metadata: "{}",
        };

        let ack: Acknowledgement = self.post("/api/v1/resources/create", &request).await?;
        ack.into_result("resource creation")
    }

    async fn grant_capability(
        &self,
        admin: &Actor,
        target_actor_id: &str,
        resource_id: &str,
        capabilities: &[Capability],
    ) -> Result<()> {
        let request = PermissionGrantRequest {
            service_id: &self.service_id,
            actor: admin,
            target_user_id: target_actor_id,
            resource_id,
            permissions: capabilities,
        };

        let ack: Acknowledgement = self.post("/api/v1/permission/grant", &request).await?;
        ack.into_result("permission grant")
    }
}
