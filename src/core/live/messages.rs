//! Live API WebSocket message types.
//!
//! All frames are JSON objects with camelCase keys.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - setup - Model, voice, instructions, tools and transcription options
//! - realtimeInput - One chunk of microphone audio
//! - toolResponse - Results of executed tool calls
//!
//! Server messages (received from server):
//! - setupComplete - Session accepted
//! - serverContent - Model turn parts, transcriptions, interruption and
//!   turn-completion flags
//! - toolCall - Tool calls requested by the model
//! - toolCallCancellation - Tool calls the model no longer needs
//! - goAway - The server will close the session soon
//!
//! Some deployments still put tool calls inside `modelTurn.parts[].functionCall`
//! (or `function_call`) and carry the thought signature under snake-case keys.
//! Inbound types accept both spellings; see [`super::extract`] for how calls
//! are located.
//!
//! Inbound frames are read section by section. A section with an unexpected
//! shape is dropped on its own; its siblings are still used and the raw JSON
//! stays available to the structural tool-call search.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::utils::pcm::{encode_pcm16_base64, pcm_mime_type};

// =============================================================================
// Session Setup
// =============================================================================

/// First message on a new session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfig {
    /// Model resource name (`models/...`)
    pub model: String,

    /// Output modalities and speech options
    pub generation_config: GenerationConfig,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    /// Tool definitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,

    /// Ask the server to transcribe the user's audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,

    /// Ask the server to transcribe its own synthesized audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

/// Generation options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Response modalities (`AUDIO`)
    pub response_modalities: Vec<String>,

    /// Voice selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Text content used for system instructions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextPart {
    pub text: String,
}

impl Content {
    /// Single-part text content.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TextPart { text: text.into() }],
        }
    }
}

/// Tool definition group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// A function the model may call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// Parameter schema
    pub parameters: Value,
}

/// Empty marker object that enables a transcription stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AudioTranscriptionConfig {}

// =============================================================================
// Client Messages
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session setup, always the first message
    Setup(SetupConfig),
    /// Microphone audio
    RealtimeInput(RealtimeInput),
    /// Tool call results
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Wrap float samples captured at `sample_rate` as a realtime-input chunk.
    pub fn audio(samples: &[f32], sample_rate: u32) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Blob {
                mime_type: pcm_mime_type(sample_rate),
                data: encode_pcm16_base64(samples),
            },
        })
    }

    /// Wrap a single function response.
    pub fn tool_response(response: FunctionResponse) -> Self {
        ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![response],
        })
    }

    /// Message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::RealtimeInput(_) => "realtimeInput",
            ClientMessage::ToolResponse(_) => "toolResponse",
        }
    }
}

/// Realtime input payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeInput {
    pub audio: Blob,
}

/// Base64 media payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// e.g. `audio/pcm;rate=16000`
    #[serde(default)]
    pub mime_type: String,
    /// Base64 data
    #[serde(default)]
    pub data: String,
}

impl Blob {
    /// Whether the payload is audio.
    pub fn is_audio(&self) -> bool {
        self.mime_type.is_empty() || self.mime_type.starts_with("audio/")
    }
}

/// Tool response payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Result of one tool call.
///
/// `thought_signature` echoes the opaque token the server attached to the
/// call. It is omitted entirely when the call had none.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

// =============================================================================
// Server Messages
// =============================================================================

/// One inbound frame. Every section is optional; a frame may carry several.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerFrame {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCallBatch>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub go_away: Option<GoAway>,
    pub usage_metadata: Option<Value>,
    pub thought_signature: Option<String>,
    pub legacy_thought_signature: Option<String>,
}

impl ServerFrame {
    /// Read every recognizable section of a frame. Anything other than a JSON
    /// object yields an empty frame.
    pub fn from_value(raw: &Value) -> Self {
        let Some(map) = raw.as_object() else {
            return Self::default();
        };
        Self {
            setup_complete: present(map, "setupComplete"),
            server_content: object(map, "serverContent").map(ServerContent::from_map),
            tool_call: object(map, "toolCall").map(ToolCallBatch::from_map),
            tool_call_cancellation: field(map, "toolCallCancellation"),
            go_away: field(map, "goAway"),
            usage_metadata: present(map, "usageMetadata"),
            thought_signature: field(map, "thoughtSignature"),
            legacy_thought_signature: field(map, "thought_signature"),
        }
    }

    /// Frame-level thought signature under either spelling.
    pub fn signature(&self) -> Option<&str> {
        first_signature(&self.thought_signature, &self.legacy_thought_signature)
    }

    /// The model turn, if the frame carries one.
    pub fn model_turn(&self) -> Option<&ModelTurn> {
        self.server_content.as_ref()?.model_turn.as_ref()
    }
}

/// Conversation content from the server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    pub interrupted: Option<bool>,
    pub turn_complete: Option<bool>,
    pub generation_complete: Option<bool>,
}

impl ServerContent {
    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            model_turn: object(map, "modelTurn").map(ModelTurn::from_map),
            input_transcription: field(map, "inputTranscription"),
            output_transcription: field(map, "outputTranscription"),
            interrupted: field(map, "interrupted"),
            turn_complete: field(map, "turnComplete"),
            generation_complete: field(map, "generationComplete"),
        }
    }
}

/// A model turn made of parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub role: Option<String>,
    pub parts: Vec<Part>,
    pub thought_signature: Option<String>,
    pub legacy_thought_signature: Option<String>,
}

impl ModelTurn {
    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            role: field(map, "role"),
            parts: list(map, "parts"),
            thought_signature: field(map, "thoughtSignature"),
            legacy_thought_signature: field(map, "thought_signature"),
        }
    }

    pub fn signature(&self) -> Option<&str> {
        first_signature(&self.thought_signature, &self.legacy_thought_signature)
    }
}

/// One part of a model turn.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    pub text: Option<String>,
    /// Set when `text` is model reasoning rather than an answer
    pub thought: Option<bool>,
    pub inline_data: Option<Blob>,
    pub function_call: Option<FunctionCall>,
    #[serde(rename = "function_call")]
    pub legacy_function_call: Option<FunctionCall>,
    pub thought_signature: Option<String>,
    #[serde(rename = "thought_signature")]
    pub legacy_thought_signature: Option<String>,
}

impl Part {
    pub fn signature(&self) -> Option<&str> {
        first_signature(&self.thought_signature, &self.legacy_thought_signature)
    }

    /// The function call under either spelling.
    pub fn call(&self) -> Option<&FunctionCall> {
        self.function_call
            .as_ref()
            .or(self.legacy_function_call.as_ref())
    }

    /// Whether this part is reasoning text.
    pub fn is_thought(&self) -> bool {
        self.thought.unwrap_or(false)
    }
}

/// A tool call as sent by the server.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FunctionCall {
    #[serde(deserialize_with = "string_or_number")]
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(alias = "arguments")]
    pub args: Option<Value>,
    pub thought_signature: Option<String>,
    #[serde(rename = "thought_signature")]
    pub legacy_thought_signature: Option<String>,
}

impl FunctionCall {
    pub fn signature(&self) -> Option<&str> {
        first_signature(&self.thought_signature, &self.legacy_thought_signature)
    }
}

/// Top-level batch of tool calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallBatch {
    pub function_calls: Vec<FunctionCall>,
}

impl ToolCallBatch {
    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            function_calls: list(map, "functionCalls"),
        }
    }
}

/// Tool calls the server cancelled.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolCallCancellation {
    pub ids: Vec<String>,
}

/// Transcription fragment.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Transcription {
    pub text: Option<String>,
}

/// Advance notice that the server will close the session.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GoAway {
    pub time_left: Option<String>,
}

/// A parsed frame plus the raw JSON it came from.
///
/// The raw value backs the structural fallback search for tool calls.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub frame: ServerFrame,
    pub raw: Value,
}

impl InboundFrame {
    /// Parse one inbound text frame. Only text that is not JSON is an error.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(text)?;
        let frame = ServerFrame::from_value(&raw);
        Ok(Self { frame, raw })
    }
}

/// Non-null value under `key`.
fn present(map: &Map<String, Value>, key: &str) -> Option<Value> {
    map.get(key).filter(|v| !v.is_null()).cloned()
}

/// Object under `key`.
fn object<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    map.get(key).and_then(Value::as_object)
}

/// Typed value under `key`; dropped when it has the wrong shape.
fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Option<T> {
    let value = map.get(key).filter(|v| !v.is_null())?;
    match T::deserialize(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::debug!(field = key, "Ignoring malformed frame field: {}", e);
            None
        }
    }
}

/// Array under `key`, keeping every element that parses.
fn list<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Vec<T> {
    let Some(value) = map.get(key).filter(|v| !v.is_null()) else {
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        tracing::debug!(field = key, "Ignoring frame field that is not a list");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match T::deserialize(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::debug!(field = key, "Ignoring malformed list entry: {}", e);
                None
            }
        })
        .collect()
}

/// Call ids normally arrive as strings; numeric ids are kept as their text.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(id)) => Some(id),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

fn first_signature<'a>(camel: &'a Option<String>, snake: &'a Option<String>) -> Option<&'a str> {
    camel
        .as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| snake.as_deref().filter(|s| !s.is_empty()))
}
