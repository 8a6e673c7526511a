//! Tool-call execution with at-most-once side effects.
//!
//! Every call id is recorded in a ledger before its side effect starts. A
//! repeated id never triggers a second service call: mutating calls get a
//! synthesized duplicate acknowledgement carrying the first execution's
//! outcome (waiting for it while it is still running), queries are simply
//! re-read. If the first execution fails the id is removed again so the model
//! may retry.
//!
//! Every call, including unknown tools and malformed arguments, produces
//! exactly one [`FunctionResponse`].

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::future::pending;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{Id, JoinSet};

use super::extract::ToolCallRequest;
use super::messages::FunctionResponse;
use crate::core::home::{
    CONTROL_DEVICE_TOOL, ControlPlane, ControlPlaneError, EntityState, GET_STATE_TOOL,
    ServiceCall, is_valid_entity_id,
};

/// What a tool call asks the control plane to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOperation {
    /// Invoke a service (has side effects)
    Mutate(ServiceCall),
    /// Read an entity's state
    Query(String),
}

#[derive(Deserialize)]
struct ControlArgs {
    #[serde(default)]
    domain: Option<String>,
    service: String,
    entity_id: String,
    #[serde(default)]
    service_data: Option<Value>,
}

#[derive(Deserialize)]
struct StateArgs {
    entity_id: String,
}

impl ToolOperation {
    /// Map a tool name and arguments onto an operation.
    pub fn parse(name: &str, args: &Value) -> Result<Self, ControlPlaneError> {
        match name {
            CONTROL_DEVICE_TOOL => {
                let args: ControlArgs = serde_json::from_value(args.clone())
                    .map_err(|e| ControlPlaneError::InvalidArguments(e.to_string()))?;
                check_entity_id(&args.entity_id)?;
                let domain = match args.domain.filter(|d| !d.is_empty()) {
                    Some(domain) => domain,
                    None => args
                        .entity_id
                        .split_once('.')
                        .map(|(domain, _)| domain.to_string())
                        .unwrap_or_default(),
                };
                if args.service.is_empty() {
                    return Err(ControlPlaneError::InvalidArguments(
                        "service must not be empty".to_string(),
                    ));
                }
                Ok(ToolOperation::Mutate(ServiceCall {
                    domain,
                    service: args.service,
                    entity_id: args.entity_id,
                    service_data: args.service_data.filter(|d| !d.is_null()),
                }))
            }
            GET_STATE_TOOL => {
                let args: StateArgs = serde_json::from_value(args.clone())
                    .map_err(|e| ControlPlaneError::InvalidArguments(e.to_string()))?;
                check_entity_id(&args.entity_id)?;
                Ok(ToolOperation::Query(args.entity_id))
            }
            other => Err(ControlPlaneError::UnknownTool(other.to_string())),
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(self, ToolOperation::Mutate(_))
    }
}

fn check_entity_id(entity_id: &str) -> Result<(), ControlPlaneError> {
    if is_valid_entity_id(entity_id) {
        Ok(())
    } else {
        Err(ControlPlaneError::InvalidArguments(format!(
            "malformed entity_id '{entity_id}'"
        )))
    }
}

/// A finished tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call: ToolCallRequest,
    /// The id had already been executed in this session
    pub duplicate: bool,
    pub result: Result<Value, ControlPlaneError>,
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcome of a first execution; `None` while it is still running.
type Settled = Option<Result<(), ControlPlaneError>>;

/// Runs tool calls against the control plane.
pub struct FunctionCallExecutor {
    control_plane: Arc<dyn ControlPlane>,
    ledger: HashSet<String>,
    /// First-execution outcome per call id, watched by duplicates
    settled: HashMap<String, watch::Receiver<Settled>>,
    in_flight: JoinSet<ToolOutcome>,
    pending: HashMap<Id, (ToolCallRequest, bool)>,
}

impl FunctionCallExecutor {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            control_plane,
            ledger: HashSet::new(),
            settled: HashMap::new(),
            in_flight: JoinSet::new(),
            pending: HashMap::new(),
        }
    }

    /// Whether `id` has been executed (or is executing) in this session.
    pub fn has_executed(&self, id: &str) -> bool {
        self.ledger.contains(id)
    }

    /// Calls still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Start a call in the background. Returns `true` for a duplicate id.
    pub fn execute(&mut self, call: ToolCallRequest) -> bool {
        let duplicate = !self.ledger.insert(call.id.clone());
        let operation = ToolOperation::parse(&call.name, &call.args);
        let control_plane = self.control_plane.clone();

        if duplicate {
            tracing::info!(call_id = %call.id, name = %call.name, "Duplicate tool call");
        } else {
            tracing::info!(call_id = %call.id, name = %call.name, "Executing tool call");
        }

        let (settle, original) = if duplicate {
            (None, self.settled.get(&call.id).cloned())
        } else {
            let (tx, rx) = watch::channel(None);
            self.settled.insert(call.id.clone(), rx);
            (Some(tx), None)
        };

        let task_call = call.clone();
        let handle = self.in_flight.spawn(async move {
            let result = match operation {
                Err(e) => Err(e),
                Ok(ToolOperation::Mutate(service)) if duplicate => {
                    let first = match original {
                        Some(original) => first_execution(original).await,
                        None => Ok(()),
                    };
                    first.map(|()| {
                        json!({
                            "success": true,
                            "duplicate": true,
                            "entity_id": service.entity_id,
                            "service": service.qualified_service(),
                        })
                    })
                }
                Ok(ToolOperation::Mutate(service)) => control_plane
                    .call_service(&service)
                    .await
                    .map(|result| {
                        json!({
                            "success": true,
                            "entity_id": service.entity_id,
                            "service": service.qualified_service(),
                            "result": result,
                        })
                    }),
                Ok(ToolOperation::Query(entity_id)) => control_plane
                    .get_state(&entity_id)
                    .await
                    .map(state_response),
            };
            if let Some(settle) = settle {
                settle.send_replace(Some(result.as_ref().map(|_| ()).map_err(Clone::clone)));
            }
            ToolOutcome {
                call: task_call,
                duplicate,
                result,
            }
        });
        self.pending.insert(handle.id(), (call, duplicate));
        duplicate
    }

    /// Wait for the next call to finish. Never resolves while nothing is in
    /// flight. Cancel safe.
    pub async fn next_completed(&mut self) -> ToolOutcome {
        loop {
            match self.in_flight.join_next_with_id().await {
                Some(Ok((id, outcome))) => {
                    self.pending.remove(&id);
                    return outcome;
                }
                Some(Err(e)) => {
                    let Some((call, duplicate)) = self.pending.remove(&e.id()) else {
                        continue;
                    };
                    if e.is_cancelled() {
                        continue;
                    }
                    tracing::error!(call_id = %call.id, "Tool call task failed: {}", e);
                    return ToolOutcome {
                        call,
                        duplicate,
                        result: Err(ControlPlaneError::RequestFailed(
                            "tool call task failed".to_string(),
                        )),
                    };
                }
                None => pending::<()>().await,
            }
        }
    }

    /// Turn an outcome into the response for the server.
    ///
    /// A failed first execution is removed from the ledger.
    pub fn complete(&mut self, outcome: ToolOutcome) -> FunctionResponse {
        let ToolOutcome {
            call,
            duplicate,
            result,
        } = outcome;

        let response = match result {
            Ok(value) => value,
            Err(e) => {
                if !duplicate {
                    self.ledger.remove(&call.id);
                }
                tracing::warn!(call_id = %call.id, name = %call.name, "Tool call failed: {}", e);
                json!({ "success": false, "error": e.to_string() })
            }
        };

        FunctionResponse {
            id: call.id,
            name: call.name,
            response,
            thought_signature: call.thought_signature,
        }
    }

    /// Abort everything in flight and forget the ledger.
    pub fn clear(&mut self) {
        if !self.in_flight.is_empty() {
            tracing::debug!(aborted = self.in_flight.len(), "Aborting in-flight tool calls");
        }
        self.in_flight = JoinSet::new();
        self.pending.clear();
        self.ledger.clear();
        self.settled.clear();
    }
}

/// Wait for the first execution of a call id to finish.
async fn first_execution(mut original: watch::Receiver<Settled>) -> Result<(), ControlPlaneError> {
    match original.wait_for(Option::is_some).await {
        Ok(settled) => (*settled).clone().unwrap_or(Ok(())),
        Err(_) => Err(ControlPlaneError::RequestFailed(
            "first execution was cancelled".to_string(),
        )),
    }
}

fn state_response(state: EntityState) -> Value {
    json!({
        "success": true,
        "entity_id": state.entity_id,
        "state": state.state,
        "attributes": state.attributes,
        "last_changed": state.last_changed,
    })
}
