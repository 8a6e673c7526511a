//! Base traits and types for the live voice session.
//!
//! This module defines the error taxonomy, the session lifecycle states, the
//! user-visible session events and the transport seam that the session
//! orchestrator drives.
//!
//! # Audio Format
//!
//! Outbound audio is PCM 16-bit signed little-endian at the capture rate the
//! platform granted. Inbound audio is PCM 16-bit at the configured output
//! sample rate (24kHz by default).

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::messages::{ClientMessage, SetupConfig};

/// Grace period for the connection task to flush a close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during a live session.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Required configuration (usually the API credential) is missing
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Microphone denied or unavailable
    #[error("Microphone unavailable: {0}")]
    MediaAccess(String),

    /// Audio-processing stage failed to start
    #[error("Audio pipeline error: {0}")]
    AudioPipeline(String),

    /// The remote service closed the session
    #[error("Session closed by remote (code {code}): {reason}")]
    ProtocolClose {
        code: u16,
        reason: String,
        transient: bool,
    },

    /// Connection to the remote service failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Decoding or scheduling a single audio chunk failed
    #[error("Playback error: {0}")]
    Playback(String),
}

impl LiveError {
    /// Status line shown to the user when a connect attempt fails.
    pub fn user_message(&self) -> String {
        match self {
            LiveError::Configuration(_) => {
                "Add your Gemini API key in the settings before connecting.".to_string()
            }
            LiveError::MediaAccess(detail) => format!(
                "Microphone access failed ({detail}). Check that an input device is connected \
                 and that this app is allowed to use it, then try again."
            ),
            LiveError::AudioPipeline(detail) => {
                format!("Audio processing could not start ({detail}). Try again.")
            }
            LiveError::ProtocolClose {
                transient: true, ..
            } => "Connection to the assistant dropped. Try connecting again.".to_string(),
            LiveError::ProtocolClose { reason, .. } => {
                format!("The assistant service rejected the session: {reason}")
            }
            other => format!("Connection failed: {other}"),
        }
    }
}

/// Result type for live session operations.
pub type LiveResult<T> = Result<T, LiveError>;

/// Classify a WebSocket close code.
///
/// Transient codes are worth a manual retry; fatal codes (bad request, policy
/// violation such as an invalid key, application codes) are not.
pub fn is_transient_close(code: u16) -> bool {
    matches!(code, 1000 | 1001 | 1005 | 1006 | 1011 | 1012 | 1013 | 1014)
}

// =============================================================================
// Configuration
// =============================================================================

/// Runtime configuration for one live session.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// API key for the remote service. Required to connect.
    pub api_key: Option<String>,
    /// Model name (with or without the `models/` prefix)
    pub model: String,
    /// Prebuilt voice name
    pub voice: String,
    /// System instructions for the assistant
    pub instructions: String,
    /// Teardown delay after the last activity
    pub idle_timeout: Duration,
    /// Sample rate (Hz) used to decode synthesized audio
    pub output_sample_rate: u32,
    /// Requested microphone sample rate (Hz); the platform may grant another
    pub input_sample_rate: u32,
    /// Samples per captured frame
    pub capture_frame_size: usize,
    /// How long to wait for the remote service to confirm the session
    pub connect_timeout: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: super::gemini::DEFAULT_GEMINI_LIVE_MODEL.to_string(),
            voice: super::gemini::GeminiVoice::default().as_str().to_string(),
            instructions: String::new(),
            idle_timeout: Duration::from_millis(60_000),
            output_sample_rate: 24_000,
            input_sample_rate: 16_000,
            capture_frame_size: 2048,
            connect_timeout: Duration::from_millis(15_000),
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session
    #[default]
    Idle,
    /// Opening the session and attaching the microphone
    Connecting,
    /// Streaming in both directions
    Active,
    /// Releasing resources
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The user stopped the session
    UserRequested,
    /// No activity for the configured idle timeout
    IdleTimeout,
    /// The remote service closed the channel
    RemoteClosed {
        code: u16,
        reason: String,
        transient: bool,
    },
    /// The stream failed
    StreamError(String),
}

impl DisconnectReason {
    /// Build a remote-close reason, classifying the code.
    pub fn remote_closed(code: u16, reason: impl Into<String>) -> Self {
        DisconnectReason::RemoteClosed {
            code,
            reason: reason.into(),
            transient: is_transient_close(code),
        }
    }

    /// Status line shown to the user once the session is gone.
    pub fn status_message(&self) -> String {
        match self {
            DisconnectReason::UserRequested => "Disconnected.".to_string(),
            DisconnectReason::IdleTimeout => "Disconnected due to inactivity.".to_string(),
            DisconnectReason::RemoteClosed {
                transient: true, ..
            } => "Connection closed by the assistant service. You can reconnect.".to_string(),
            DisconnectReason::RemoteClosed { code, reason, .. } => {
                if reason.is_empty() {
                    format!("Session ended by the assistant service (code {code}).")
                } else {
                    format!("Session ended by the assistant service: {reason} (code {code}).")
                }
            }
            DisconnectReason::StreamError(detail) => format!("Connection error: {detail}"),
        }
    }

    /// Express the reason as an error for callers that need one.
    ///
    /// User stops and idle timeouts are not errors.
    pub fn as_error(&self) -> Option<LiveError> {
        match self {
            DisconnectReason::RemoteClosed {
                code,
                reason,
                transient,
            } => Some(LiveError::ProtocolClose {
                code: *code,
                reason: reason.clone(),
                transient: *transient,
            }),
            DisconnectReason::StreamError(detail) => {
                Some(LiveError::WebSocketError(detail.clone()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::UserRequested => write!(f, "user_requested"),
            DisconnectReason::IdleTimeout => write!(f, "idle_timeout"),
            DisconnectReason::RemoteClosed { code, .. } => write!(f, "remote_closed({code})"),
            DisconnectReason::StreamError(_) => write!(f, "stream_error"),
        }
    }
}

// =============================================================================
// Session Events
// =============================================================================

/// Events published to the caller while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Lifecycle transition
    StateChanged(SessionState),
    /// A fragment of the user's own speech was transcribed
    UserTranscript { fragment: String, pending: String },
    /// Assistant text part
    AssistantText(String),
    /// Assistant reasoning text (displayed, never executed)
    AssistantThought(String),
    /// Transcript of the assistant's synthesized speech
    AssistantTranscript(String),
    /// A tool call was handed to the executor
    ToolCallStarted {
        id: String,
        name: String,
        duplicate: bool,
    },
    /// A tool call response was sent upstream
    ToolCallFinished {
        id: String,
        name: String,
        success: bool,
    },
    /// The user barged in over assistant audio
    Interrupted,
    /// The assistant finished its turn
    TurnComplete,
    /// The remote service announced it will close soon
    GoAway { time_left: Option<String> },
    /// The session is gone
    Disconnected(DisconnectReason),
}

// =============================================================================
// Transport
// =============================================================================

/// Event delivered by the transport's connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound protocol frame (JSON text)
    Frame(String),
    /// The remote side closed the channel
    Closed { code: u16, reason: String },
    /// The stream failed
    Error(String),
}

/// An open, confirmed session channel.
///
/// Dropping `outbound` asks the connection task to close the channel.
#[derive(Debug)]
pub struct LiveConnection {
    /// Outbound protocol messages
    pub outbound: mpsc::Sender<ClientMessage>,
    /// Inbound frames and close events, in arrival order
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
    /// Background task pumping the socket, if the transport uses one
    pub task: Option<JoinHandle<()>>,
}

impl LiveConnection {
    /// Close the channel and wait briefly for the connection task to finish.
    pub async fn close(self) {
        let LiveConnection {
            outbound,
            mut inbound,
            task,
        } = self;
        drop(outbound);
        inbound.close();
        finish_connection_task(task).await;
    }
}

/// Wait briefly for a connection task to flush its close frame, then abort it.
pub(crate) async fn finish_connection_task(task: Option<JoinHandle<()>>) {
    if let Some(mut handle) = task
        && tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err()
    {
        tracing::debug!("Connection task did not finish in time, aborting");
        handle.abort();
    }
}

/// Opens the duplex session channel with the remote service.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Open the channel, send `setup` and wait for the remote confirmation.
    async fn connect(&self, api_key: &str, setup: SetupConfig) -> LiveResult<LiveConnection>;
}
