//! Configuration module for the live session client
//!
//! Settings come from `.env` files, YAML files and environment variables.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_live::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config_path = PathBuf::from("config.yaml");
//! let config = ClientConfig::from_file(&config_path)?;
//!
//! println!("Using voice {}", config.live_voice);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroize;

mod env;
mod merge;
mod validation;
mod yaml;

pub use validation::{MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
pub use yaml::YamlConfig;

use crate::core::home::HomeAssistantConfig;
use crate::core::live::LiveConfig;
use crate::utils::url_validation::validate_control_plane_url;

/// Persona used when no instructions are configured.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly voice assistant for a smart home. \
Keep answers short and conversational. Use control_home_device to operate devices and \
get_device_state to check on them, then tell the user what happened. \
If a request is ambiguous, ask which device they mean.";

pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24_000;
pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_CAPTURE_FRAME_SIZE: usize = 2048;
pub const DEFAULT_HOME_ASSISTANT_URL: &str = "http://homeassistant.local:8123";
pub const DEFAULT_HOME_ASSISTANT_TIMEOUT_SECONDS: u64 = 10;

/// Client configuration
///
/// Secrets are zeroized when the configuration is dropped.
#[derive(Clone)]
pub struct ClientConfig {
    // Live session
    pub gemini_api_key: Option<String>,
    pub live_model: String,
    pub live_voice: String,
    pub live_url: String,
    pub live_instructions: String,
    pub live_connect_timeout_ms: u64,

    // Audio
    pub idle_timeout_ms: u64,
    pub output_sample_rate: u32,
    pub input_sample_rate: u32,
    pub capture_frame_size: usize,

    // Control plane
    pub home_assistant_url: String,
    pub home_assistant_token: Option<String>,
    pub home_assistant_timeout_seconds: u64,

    /// Optional YAML/JSON file listing the controllable entities
    pub entity_directory_path: Option<PathBuf>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "***"))
            .field("live_model", &self.live_model)
            .field("live_voice", &self.live_voice)
            .field("live_url", &self.live_url)
            .field("live_connect_timeout_ms", &self.live_connect_timeout_ms)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("output_sample_rate", &self.output_sample_rate)
            .field("input_sample_rate", &self.input_sample_rate)
            .field("capture_frame_size", &self.capture_frame_size)
            .field("home_assistant_url", &self.home_assistant_url)
            .field(
                "home_assistant_token",
                &self.home_assistant_token.as_ref().map(|_| "***"),
            )
            .field(
                "home_assistant_timeout_seconds",
                &self.home_assistant_timeout_seconds,
            )
            .field("entity_directory_path", &self.entity_directory_path)
            .finish()
    }
}

impl Drop for ClientConfig {
    fn drop(&mut self) {
        if let Some(ref mut key) = self.gemini_api_key {
            key.zeroize();
        }
        if let Some(ref mut token) = self.home_assistant_token {
            token.zeroize();
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file with environment variable fallbacks
    ///
    /// Priority: YAML > ENV vars > .env values > defaults.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Whether a Gemini API key is configured
    pub fn has_api_key(&self) -> bool {
        self.gemini_api_key.is_some()
    }

    /// Session settings for [`crate::SessionManager`]
    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            api_key: self.gemini_api_key.clone(),
            model: self.live_model.clone(),
            voice: self.live_voice.clone(),
            instructions: self.live_instructions.clone(),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            output_sample_rate: self.output_sample_rate,
            input_sample_rate: self.input_sample_rate,
            capture_frame_size: self.capture_frame_size,
            connect_timeout: Duration::from_millis(self.live_connect_timeout_ms),
        }
    }

    /// Connection settings for the Home Assistant client
    pub fn home_assistant_config(&self) -> Result<HomeAssistantConfig, Box<dyn std::error::Error>> {
        let base_url = validate_control_plane_url(&self.home_assistant_url)
            .map_err(|e| format!("Invalid HOME_ASSISTANT_URL: {e}"))?;
        Ok(HomeAssistantConfig {
            base_url,
            token: self.home_assistant_token.clone(),
            timeout: Duration::from_secs(self.home_assistant_timeout_seconds),
        })
    }
}
