//! Gemini Live API transport.
//!
//! # Audio Format
//!
//! Microphone audio is sent as `audio/pcm;rate=<capture rate>`. Synthesized
//! speech arrives as PCM16 at 24kHz inside `inlineData` parts.
//!
//! # Supported Voices
//!
//! Puck, Charon, Kore, Fenrir, Aoede, Leda, Orus, Zephyr

mod client;
mod config;

pub use client::GeminiLiveTransport;
pub use config::{
    DEFAULT_GEMINI_LIVE_MODEL, GEMINI_LIVE_URL, GEMINI_OUTPUT_SAMPLE_RATE, GeminiVoice,
    build_setup, model_resource,
};
