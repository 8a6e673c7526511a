//! Home-automation control plane.
//!
//! Tool calls from the assistant end up here: device control becomes a
//! service call, state queries become entity lookups. The control plane is a
//! trait so the session can be exercised without a live server.

mod client;
mod entities;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use client::{HomeAssistantClient, HomeAssistantConfig};
pub use entities::{
    CONTROL_DEVICE_TOOL, EntityDirectory, EntityDirectoryError, EntityInfo, GET_STATE_TOOL,
    is_valid_entity_id,
};

/// Errors raised while executing a tool call against the control plane.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlPlaneError {
    /// The model asked for a tool that does not exist
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments missing or malformed
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Transport-level failure talking to the control plane
    #[error("Control plane request failed: {0}")]
    RequestFailed(String),

    /// The control plane answered with an error status
    #[error("Control plane returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The entity does not exist
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// No access token configured
    #[error("Control plane token is not configured")]
    MissingToken,
}

/// A device-control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    /// e.g. `light`
    pub domain: String,
    /// e.g. `turn_on`
    pub service: String,
    /// e.g. `light.kitchen`
    pub entity_id: String,
    /// Extra service fields (brightness, temperature, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_data: Option<Value>,
}

impl ServiceCall {
    /// `domain.service`, for logs and responses.
    pub fn qualified_service(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }
}

/// Current state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<String>,
}

/// Executes device control and state queries.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Invoke a service. Returns the control plane's response body.
    async fn call_service(&self, call: &ServiceCall) -> Result<Value, ControlPlaneError>;

    /// Fetch the current state of an entity.
    async fn get_state(&self, entity_id: &str) -> Result<EntityState, ControlPlaneError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_call_deserializes_optional_data() {
        let call: ServiceCall = serde_json::from_value(json!({
            "domain": "light",
            "service": "turn_on",
            "entity_id": "light.kitchen"
        }))
        .unwrap();
        assert!(call.service_data.is_none());
        assert_eq!(call.qualified_service(), "light.turn_on");
    }

    #[test]
    fn test_error_display() {
        let err = ControlPlaneError::Status {
            status: 401,
            message: "Unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "Control plane returned HTTP 401: Unauthorized");
    }
}
