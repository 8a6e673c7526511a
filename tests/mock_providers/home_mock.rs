//! Control plane double
//!
//! Records every request. Requests can be held at a gate until the test
//! releases them, or failed with a fixed error.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use waav_live::{ControlPlane, ControlPlaneError, EntityState, ServiceCall};

#[derive(Default)]
struct Recorded {
    service_calls: Vec<ServiceCall>,
    state_queries: Vec<String>,
    failure: Option<ControlPlaneError>,
}

pub struct MockControlPlane {
    recorded: Mutex<Recorded>,
    gate: Option<Arc<Semaphore>>,
}

impl MockControlPlane {
    /// Answers every request immediately.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            recorded: Mutex::new(Recorded::default()),
            gate: None,
        })
    }

    /// Holds every request until a permit is added to the returned gate.
    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let plane = Arc::new(Self {
            recorded: Mutex::new(Recorded::default()),
            gate: Some(gate.clone()),
        });
        (plane, gate)
    }

    /// Fail every later request with `error`.
    pub fn fail_with(&self, error: ControlPlaneError) {
        self.recorded.lock().failure = Some(error);
    }

    pub fn service_calls(&self) -> Vec<ServiceCall> {
        self.recorded.lock().service_calls.clone()
    }

    pub fn state_queries(&self) -> Vec<String> {
        self.recorded.lock().state_queries.clone()
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn call_service(&self, call: &ServiceCall) -> Result<Value, ControlPlaneError> {
        self.recorded.lock().service_calls.push(call.clone());
        self.pass_gate().await;
        if let Some(error) = self.recorded.lock().failure.clone() {
            return Err(error);
        }
        Ok(json!([{ "entity_id": call.entity_id, "state": "on" }]))
    }

    async fn get_state(&self, entity_id: &str) -> Result<EntityState, ControlPlaneError> {
        self.recorded.lock().state_queries.push(entity_id.to_string());
        self.pass_gate().await;
        if let Some(error) = self.recorded.lock().failure.clone() {
            return Err(error);
        }
        Ok(EntityState {
            entity_id: entity_id.to_string(),
            state: "off".to_string(),
            attributes: json!({ "friendly_name": "Test Device" }),
            last_changed: None,
        })
    }
}
