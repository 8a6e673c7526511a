//! Live voice session module.
//!
//! Bridges a duplex conversational-AI session to local audio devices and a
//! home-automation control plane.
//!
//! # Architecture
//!
//! - `LiveTransport` trait for the remote session channel
//! - `AudioInput` / `AudioOutput` traits for the devices
//! - One task per session owns all state and multiplexes every event source
//!
//! # Audio Format
//!
//! - Outbound: PCM 16-bit signed little-endian at the granted capture rate
//! - Inbound: PCM 16-bit signed little-endian at 24kHz
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_live::core::live::{GeminiLiveTransport, LiveConfig, SessionManager};
//!
//! let config = LiveConfig {
//!     api_key: Some("AIza...".to_string()),
//!     ..Default::default()
//! };
//! let mut manager = SessionManager::new(
//!     config,
//!     Arc::new(GeminiLiveTransport::default()),
//!     control_plane,
//!     devices,
//! );
//! let mut events = manager.take_events().unwrap();
//! manager.start().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

mod base;
pub mod capture;
pub mod dispatcher;
pub mod executor;
pub mod extract;
pub mod gemini;
pub mod idle;
pub mod messages;
pub mod playback;
pub mod session;

pub use base::{
    DisconnectReason, LiveConfig, LiveConnection, LiveError, LiveResult, LiveTransport,
    SessionEvent, SessionState, TransportEvent, is_transient_close,
};
pub use capture::{AudioInput, CaptureFrame, CapturePipeline, CaptureRequest, WavFileInput};
pub use dispatcher::{FrameSummary, InboundDispatcher};
pub use executor::{FunctionCallExecutor, ToolOperation, ToolOutcome};
pub use extract::{ToolCallExtractor, ToolCallRequest};
pub use gemini::{GeminiLiveTransport, GeminiVoice};
pub use idle::IdleSupervisor;
pub use playback::{
    AudioBuffer, AudioOutput, PacedOutput, PlaybackScheduler, PlayedChunk, ScheduledSource,
    spawn_wav_recorder,
};
pub use session::{AudioDevices, SessionCommand, SessionContext, SessionManager};
