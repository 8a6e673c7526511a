use super::ClientConfig;
use crate::utils::url_validation::validate_control_plane_url;

/// Lowest accepted device sample rate (Hz).
pub const MIN_SAMPLE_RATE: u32 = 8_000;
/// Highest accepted device sample rate (Hz).
pub const MAX_SAMPLE_RATE: u32 = 48_000;

/// Validate the idle timeout
///
/// A zero timeout would tear every session down immediately.
pub fn validate_idle_timeout(idle_timeout_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    if idle_timeout_ms == 0 {
        return Err("IDLE_TIMEOUT_MS must be greater than zero".into());
    }
    Ok(())
}

/// Validate a sample rate setting
pub fn validate_sample_rate(name: &str, rate: u32) -> Result<(), Box<dyn std::error::Error>> {
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
        return Err(format!(
            "{name} must be between {MIN_SAMPLE_RATE} and {MAX_SAMPLE_RATE} Hz, got {rate}"
        )
        .into());
    }
    Ok(())
}

/// Validate the capture frame size
pub fn validate_frame_size(frame_size: usize) -> Result<(), Box<dyn std::error::Error>> {
    if frame_size == 0 {
        return Err("CAPTURE_FRAME_SIZE must be greater than zero".into());
    }
    Ok(())
}

/// Validate the session setup timeout
pub fn validate_connect_timeout(timeout_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    if timeout_ms == 0 {
        return Err("LIVE_CONNECT_TIMEOUT_MS must be greater than zero".into());
    }
    Ok(())
}

/// Validate the control plane URL
pub fn validate_home_assistant_url(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    validate_control_plane_url(url).map_err(|e| format!("Invalid HOME_ASSISTANT_URL: {e}"))?;
    Ok(())
}

/// Validate every setting that has constraints
///
/// The API key is deliberately not required here: its absence is reported when
/// a session is started.
pub fn validate_config(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_idle_timeout(config.idle_timeout_ms)?;
    validate_sample_rate("OUTPUT_SAMPLE_RATE", config.output_sample_rate)?;
    validate_sample_rate("INPUT_SAMPLE_RATE", config.input_sample_rate)?;
    validate_frame_size(config.capture_frame_size)?;
    validate_connect_timeout(config.live_connect_timeout_ms)?;
    validate_home_assistant_url(&config.home_assistant_url)?;
    Ok(())
}
