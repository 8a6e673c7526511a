use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// live:
///   api_key: "your-gemini-key"
///   model: "gemini-2.5-flash-native-audio-preview-09-2025"
///   voice: "Puck"
///   instructions: "You are a helpful home assistant."
///   connect_timeout_ms: 15000
///
/// audio:
///   idle_timeout_ms: 60000
///   output_sample_rate: 24000
///   input_sample_rate: 16000
///   frame_size: 2048
///
/// home_assistant:
///   url: "http://homeassistant.local:8123"
///   token: "long-lived-access-token"
///   timeout_seconds: 10
///
/// entities:
///   path: "/etc/waav-live/entities.yaml"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub live: Option<LiveYaml>,
    pub audio: Option<AudioYaml>,
    pub home_assistant: Option<HomeAssistantYaml>,
    pub entities: Option<EntitiesYaml>,
}

/// Live session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LiveYaml {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub url: Option<String>,
    pub instructions: Option<String>,
    pub connect_timeout_ms: Option<u64>,
}

/// Audio settings from YAML
///
/// camelCase spellings are accepted for the keys settings UIs commonly write.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    #[serde(alias = "idleTimeoutMs")]
    pub idle_timeout_ms: Option<u64>,
    #[serde(alias = "outputSampleRate")]
    pub output_sample_rate: Option<u32>,
    #[serde(alias = "inputSampleRate")]
    pub input_sample_rate: Option<u32>,
    #[serde(alias = "frameSize")]
    pub frame_size: Option<usize>,
}

/// Control plane settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HomeAssistantYaml {
    pub url: Option<String>,
    pub token: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Entity directory settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EntitiesYaml {
    pub path: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
