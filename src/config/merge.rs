use std::path::PathBuf;

use super::ClientConfig;
use super::env::load_from_env;
use super::yaml::YamlConfig;

/// Merge YAML overrides on top of the environment-derived configuration
///
/// Priority: YAML > environment variables > `.env` values > defaults.
/// Empty YAML strings are treated as absent.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(live) = yaml.live {
        if let Some(api_key) = non_empty(live.api_key) {
            config.gemini_api_key = Some(api_key);
        }
        if let Some(model) = non_empty(live.model) {
            config.live_model = model;
        }
        if let Some(voice) = non_empty(live.voice) {
            config.live_voice = voice;
        }
        if let Some(url) = non_empty(live.url) {
            config.live_url = url;
        }
        if let Some(instructions) = non_empty(live.instructions) {
            config.live_instructions = instructions;
        }
        if let Some(timeout) = live.connect_timeout_ms {
            config.live_connect_timeout_ms = timeout;
        }
    }

    if let Some(audio) = yaml.audio {
        if let Some(idle) = audio.idle_timeout_ms {
            config.idle_timeout_ms = idle;
        }
        if let Some(rate) = audio.output_sample_rate {
            config.output_sample_rate = rate;
        }
        if let Some(rate) = audio.input_sample_rate {
            config.input_sample_rate = rate;
        }
        if let Some(frame_size) = audio.frame_size {
            config.capture_frame_size = frame_size;
        }
    }

    if let Some(ha) = yaml.home_assistant {
        if let Some(url) = non_empty(ha.url) {
            config.home_assistant_url = url;
        }
        if let Some(token) = non_empty(ha.token) {
            config.home_assistant_token = Some(token);
        }
        if let Some(timeout) = ha.timeout_seconds {
            config.home_assistant_timeout_seconds = timeout;
        }
    }

    if let Some(path) = yaml.entities.and_then(|e| non_empty(e.path)) {
        config.entity_directory_path = Some(PathBuf::from(path));
    }

    Ok(config)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
