//! Environment variable loading.
//!
//! Reads every setting from the process environment (which already includes
//! `.env` values loaded at startup) and falls back to defaults.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use super::{
    ClientConfig, DEFAULT_CAPTURE_FRAME_SIZE, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_HOME_ASSISTANT_TIMEOUT_SECONDS, DEFAULT_HOME_ASSISTANT_URL, DEFAULT_IDLE_TIMEOUT_MS,
    DEFAULT_INPUT_SAMPLE_RATE, DEFAULT_INSTRUCTIONS, DEFAULT_OUTPUT_SAMPLE_RATE,
};
use crate::core::live::gemini::{DEFAULT_GEMINI_LIVE_MODEL, GEMINI_LIVE_URL, GeminiVoice};

/// Non-empty, trimmed value of an environment variable.
pub(super) fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable, falling back to `default` when unset.
pub(super) fn env_parse<T>(name: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: Display,
{
    match env_string(name) {
        Some(value) => value
            .parse::<T>()
            .map_err(|e| format!("Invalid {name} '{value}': {e}").into()),
        None => Ok(default),
    }
}

/// Configuration built from environment variables and defaults only.
pub(super) fn load_from_env() -> Result<ClientConfig, Box<dyn std::error::Error>> {
    Ok(ClientConfig {
        gemini_api_key: env_string("GEMINI_API_KEY").or_else(|| env_string("GOOGLE_API_KEY")),
        live_model: env_string("GEMINI_MODEL")
            .unwrap_or_else(|| DEFAULT_GEMINI_LIVE_MODEL.to_string()),
        live_voice: env_string("GEMINI_VOICE")
            .unwrap_or_else(|| GeminiVoice::default().as_str().to_string()),
        live_url: env_string("GEMINI_LIVE_URL").unwrap_or_else(|| GEMINI_LIVE_URL.to_string()),
        live_instructions: env_string("LIVE_INSTRUCTIONS")
            .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
        live_connect_timeout_ms: env_parse("LIVE_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS)?,

        idle_timeout_ms: env_parse("IDLE_TIMEOUT_MS", DEFAULT_IDLE_TIMEOUT_MS)?,
        output_sample_rate: env_parse("OUTPUT_SAMPLE_RATE", DEFAULT_OUTPUT_SAMPLE_RATE)?,
        input_sample_rate: env_parse("INPUT_SAMPLE_RATE", DEFAULT_INPUT_SAMPLE_RATE)?,
        capture_frame_size: env_parse("CAPTURE_FRAME_SIZE", DEFAULT_CAPTURE_FRAME_SIZE)?,

        home_assistant_url: env_string("HOME_ASSISTANT_URL")
            .unwrap_or_else(|| DEFAULT_HOME_ASSISTANT_URL.to_string()),
        home_assistant_token: env_string("HOME_ASSISTANT_TOKEN"),
        home_assistant_timeout_seconds: env_parse(
            "HOME_ASSISTANT_TIMEOUT_SECONDS",
            DEFAULT_HOME_ASSISTANT_TIMEOUT_SECONDS,
        )?,

        entity_directory_path: env_string("ENTITY_DIRECTORY_PATH").map(PathBuf::from),
    })
}

impl ClientConfig {
    /// Load configuration from environment variables only
    ///
    /// Missing variables fall back to defaults. The result is validated.
    ///
    /// # Example
    /// ```rust,no_run
    /// use waav_live::config::ClientConfig;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ClientConfig::from_env()?;
    /// println!("Control plane at {}", config.home_assistant_url);
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = super::merge::merge_config(None)?;
        super::validation::validate_config(&config)?;
        Ok(config)
    }
}
