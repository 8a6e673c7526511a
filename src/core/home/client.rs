//! REST client for a Home Assistant control plane.
//!
//! - `POST {base}/api/services/{domain}/{service}` with `{entity_id, ...data}`
//! - `GET {base}/api/states/{entity_id}`
//!
//! Every request carries the long-lived access token as a bearer token.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;
use zeroize::Zeroize;

use super::{ControlPlane, ControlPlaneError, EntityState, ServiceCall, is_valid_entity_id};

const USER_AGENT: &str = concat!("waav-live/", env!("CARGO_PKG_VERSION"));
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Connection settings for [`HomeAssistantClient`].
#[derive(Clone)]
pub struct HomeAssistantConfig {
    /// Validated base URL
    pub base_url: Url,
    /// Long-lived access token
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for HomeAssistantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeAssistantConfig")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Drop for HomeAssistantConfig {
    fn drop(&mut self) {
        if let Some(token) = self.token.as_mut() {
            token.zeroize();
        }
    }
}

/// Home Assistant REST client.
pub struct HomeAssistantClient {
    config: HomeAssistantConfig,
    http_client: Client,
}

impl HomeAssistantClient {
    pub fn new(config: HomeAssistantConfig) -> Result<Self, ControlPlaneError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                ControlPlaneError::RequestFailed(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ControlPlaneError> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ControlPlaneError::RequestFailed("base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn token(&self) -> Result<&str, ControlPlaneError> {
        self.config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ControlPlaneError::MissingToken)
    }

    async fn error_from(response: reqwest::Response) -> ControlPlaneError {
        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        let message = if message.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        } else {
            message
        };
        ControlPlaneError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

/// Request body: `entity_id` merged with any extra service fields.
fn service_body(call: &ServiceCall) -> Value {
    let mut body = Map::new();
    if let Some(Value::Object(data)) = &call.service_data {
        for (key, value) in data {
            body.insert(key.clone(), value.clone());
        }
    }
    body.insert("entity_id".to_string(), Value::String(call.entity_id.clone()));
    Value::Object(body)
}

#[async_trait]
impl ControlPlane for HomeAssistantClient {
    async fn call_service(&self, call: &ServiceCall) -> Result<Value, ControlPlaneError> {
        if !is_valid_entity_id(&call.entity_id) {
            return Err(ControlPlaneError::InvalidArguments(format!(
                "malformed entity_id '{}'",
                call.entity_id
            )));
        }
        let url = self.endpoint(&["api", "services", &call.domain, &call.service])?;

        tracing::debug!(
            service = %call.qualified_service(),
            entity_id = %call.entity_id,
            "Calling control plane service"
        );

        let response = self
            .http_client
            .post(url)
            .bearer_auth(self.token()?)
            .json(&service_body(call))
            .send()
            .await
            .map_err(|e| ControlPlaneError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        // Some services answer with an empty body
        let text = response
            .text()
            .await
            .map_err(|e| ControlPlaneError::RequestFailed(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        serde_json::from_str(&text).map_err(|e| {
            ControlPlaneError::RequestFailed(format!("Failed to parse response: {e}"))
        })
    }

    async fn get_state(&self, entity_id: &str) -> Result<EntityState, ControlPlaneError> {
        if !is_valid_entity_id(entity_id) {
            return Err(ControlPlaneError::InvalidArguments(format!(
                "malformed entity_id '{entity_id}'"
            )));
        }
        let url = self.endpoint(&["api", "states", entity_id])?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(self.token()?)
            .send()
            .await
            .map_err(|e| ControlPlaneError::RequestFailed(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ControlPlaneError::EntityNotFound(entity_id.to_string())),
            status if status.is_success() => response.json::<EntityState>().await.map_err(|e| {
                ControlPlaneError::RequestFailed(format!("Failed to parse state: {e}"))
            }),
            _ => Err(Self::error_from(response).await),
        }
    }
}
