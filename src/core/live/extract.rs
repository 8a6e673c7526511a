//! Locating tool calls inside inbound frames.
//!
//! Servers have shipped tool calls in several shapes over time. Extraction runs
//! an ordered list of strategies over each frame:
//!
//! 1. [`TopLevelToolCalls`] - `toolCall.functionCalls[]` (canonical)
//! 2. [`ModelTurnParts`] - `serverContent.modelTurn.parts[].functionCall`
//! 3. [`RecursiveScan`] - a bounded walk of the raw JSON, only when the first
//!    two found nothing
//!
//! Results are de-duplicated by id within the frame.
//!
//! The thought signature for a call is taken from the first place that has
//! one: the call itself, its containing part, the containing turn, then the
//! frame root.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};

use super::messages::{FunctionCall, InboundFrame};

/// Maximum nesting depth visited by the structural fallback.
const MAX_SCAN_DEPTH: usize = 16;

/// A tool call ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    /// Server id, or a deterministic synthetic id when the server sent none
    pub id: String,
    pub name: String,
    pub args: Value,
    /// Opaque token that must be echoed in the response
    pub thought_signature: Option<String>,
    /// Strategy that found the call
    pub source: &'static str,
}

/// One way of finding tool calls in a frame.
pub trait ExtractionStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Append every call this strategy recognizes.
    fn extract(&self, frame: &InboundFrame, out: &mut Vec<ToolCallRequest>);
}

/// Canonical `toolCall.functionCalls[]` batches.
pub struct TopLevelToolCalls;

impl ExtractionStrategy for TopLevelToolCalls {
    fn name(&self) -> &'static str {
        "tool_call"
    }

    fn extract(&self, inbound: &InboundFrame, out: &mut Vec<ToolCallRequest>) {
        let Some(batch) = inbound.frame.tool_call.as_ref() else {
            return;
        };
        let turn_signature = inbound.frame.model_turn().and_then(|t| t.signature());
        let frame_signature = inbound.frame.signature();

        for call in &batch.function_calls {
            let signature = call
                .signature()
                .or(turn_signature)
                .or(frame_signature)
                .map(str::to_string);
            if let Some(request) = build_request(call, signature, self.name()) {
                out.push(request);
            }
        }
    }
}

/// Calls nested in model-turn parts.
pub struct ModelTurnParts;

impl ExtractionStrategy for ModelTurnParts {
    fn name(&self) -> &'static str {
        "model_turn_part"
    }

    fn extract(&self, inbound: &InboundFrame, out: &mut Vec<ToolCallRequest>) {
        let Some(turn) = inbound.frame.model_turn() else {
            return;
        };
        let frame_signature = inbound.frame.signature();

        for part in &turn.parts {
            let Some(call) = part.call() else {
                continue;
            };
            let signature = call
                .signature()
                .or(part.signature())
                .or(turn.signature())
                .or(frame_signature)
                .map(str::to_string);
            if let Some(request) = build_request(call, signature, self.name()) {
                out.push(request);
            }
        }
    }
}

/// Bounded walk over the raw JSON for any `functionCall`/`function_call`
/// object or `functionCalls` array.
pub struct RecursiveScan;

impl ExtractionStrategy for RecursiveScan {
    fn name(&self) -> &'static str {
        "recursive_scan"
    }

    fn extract(&self, inbound: &InboundFrame, out: &mut Vec<ToolCallRequest>) {
        let root_signature = signature_in(&inbound.raw);
        scan(&inbound.raw, root_signature.as_deref(), 0, out);
    }
}

fn scan(value: &Value, inherited: Option<&str>, depth: usize, out: &mut Vec<ToolCallRequest>) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            let here = signature_in_map(map);
            let container_signature = here.as_deref().or(inherited);

            for key in ["functionCall", "function_call"] {
                if let Some(Value::Object(call)) = map.get(key) {
                    push_raw_call(call, container_signature, out);
                }
            }
            if let Some(Value::Array(calls)) = map.get("functionCalls") {
                for call in calls {
                    if let Value::Object(call) = call {
                        push_raw_call(call, container_signature, out);
                    }
                }
            }

            for (key, child) in map {
                if matches!(key.as_str(), "functionCall" | "function_call" | "functionCalls") {
                    continue;
                }
                scan(child, container_signature, depth + 1, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                scan(item, inherited, depth + 1, out);
            }
        }
        _ => {}
    }
}

fn push_raw_call(call: &Map<String, Value>, container: Option<&str>, out: &mut Vec<ToolCallRequest>) {
    let Ok(parsed) = serde_json::from_value::<FunctionCall>(Value::Object(call.clone())) else {
        return;
    };
    let signature = parsed
        .signature()
        .or(container)
        .map(str::to_string);
    if let Some(request) = build_request(&parsed, signature, "recursive_scan") {
        out.push(request);
    }
}

fn signature_in(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => signature_in_map(map),
        _ => None,
    }
}

fn signature_in_map(map: &Map<String, Value>) -> Option<String> {
    ["thoughtSignature", "thought_signature"]
        .iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn build_request(
    call: &FunctionCall,
    thought_signature: Option<String>,
    source: &'static str,
) -> Option<ToolCallRequest> {
    let name = call.name.as_deref().filter(|n| !n.is_empty())?.to_string();
    let args = match &call.args {
        Some(Value::String(encoded)) => {
            serde_json::from_str(encoded).unwrap_or_else(|_| Value::String(encoded.clone()))
        }
        Some(value) => value.clone(),
        None => Value::Object(Map::new()),
    };
    let id = match call.id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => synthetic_call_id(&name, &args),
    };
    Some(ToolCallRequest {
        id,
        name,
        args,
        thought_signature,
        source,
    })
}

/// Deterministic id for a call the server sent without one.
///
/// Object keys serialize in sorted order, so equal arguments always hash the
/// same and a repeated call de-duplicates against the first.
pub fn synthetic_call_id(name: &str, args: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    args.to_string().hash(&mut hasher);
    format!("synthetic-{name}-{:016x}", hasher.finish())
}

/// Ordered set of strategies applied to every frame.
pub struct ToolCallExtractor {
    direct: Vec<Box<dyn ExtractionStrategy>>,
    fallback: Option<Box<dyn ExtractionStrategy>>,
}

impl Default for ToolCallExtractor {
    fn default() -> Self {
        Self {
            direct: vec![Box::new(TopLevelToolCalls), Box::new(ModelTurnParts)],
            fallback: Some(Box::new(RecursiveScan)),
        }
    }
}

impl ToolCallExtractor {
    /// Build an extractor from explicit strategies.
    pub fn new(
        direct: Vec<Box<dyn ExtractionStrategy>>,
        fallback: Option<Box<dyn ExtractionStrategy>>,
    ) -> Self {
        Self { direct, fallback }
    }

    /// Every distinct tool call in the frame, in discovery order.
    pub fn extract(&self, frame: &InboundFrame) -> Vec<ToolCallRequest> {
        let mut found = Vec::new();
        for strategy in &self.direct {
            strategy.extract(frame, &mut found);
        }

        if found.is_empty()
            && let Some(fallback) = &self.fallback
        {
            fallback.extract(frame, &mut found);
            if !found.is_empty() {
                tracing::debug!(
                    strategy = fallback.name(),
                    count = found.len(),
                    "Tool calls found outside the canonical locations"
                );
            }
        }

        for call in &found {
            if call.source != "tool_call" {
                tracing::debug!(
                    call_id = %call.id,
                    strategy = call.source,
                    "Tool call in deprecated location"
                );
            }
        }

        let mut seen = HashSet::new();
        found.retain(|call| seen.insert(call.id.clone()));
        found
    }
}
