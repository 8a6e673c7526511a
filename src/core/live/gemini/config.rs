//! Gemini Live API configuration types.
//!
//! - Endpoint and model naming
//! - Prebuilt voice selection
//! - Setup message construction

use serde::{Deserialize, Serialize};

use crate::core::live::messages::{
    AudioTranscriptionConfig, Content, GenerationConfig, PrebuiltVoiceConfig, SetupConfig,
    SpeechConfig, Tool, VoiceConfig,
};

/// Gemini Live bidirectional streaming endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio model used when none is configured.
pub const DEFAULT_GEMINI_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Synthesized audio arrives as PCM16 at this rate.
pub const GEMINI_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Model resource name as the setup message expects it.
pub fn model_resource(model: &str) -> String {
    let model = model.trim();
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Prebuilt voices for native-audio models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeminiVoice {
    /// Puck voice (default)
    #[default]
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
    Leda,
    Orus,
    Zephyr,
}

impl GeminiVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Aoede => "Aoede",
            Self::Leda => "Leda",
            Self::Orus => "Orus",
            Self::Zephyr => "Zephyr",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "puck" => Self::Puck,
            "charon" => Self::Charon,
            "kore" => Self::Kore,
            "fenrir" => Self::Fenrir,
            "aoede" => Self::Aoede,
            "leda" => Self::Leda,
            "orus" => Self::Orus,
            "zephyr" => Self::Zephyr,
            _ => Self::default(),
        }
    }

    /// All available voices.
    pub fn all() -> &'static [GeminiVoice] {
        &[
            Self::Puck,
            Self::Charon,
            Self::Kore,
            Self::Fenrir,
            Self::Aoede,
            Self::Leda,
            Self::Orus,
            Self::Zephyr,
        ]
    }
}

impl std::fmt::Display for GeminiVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Setup
// =============================================================================

/// Build the setup message: audio responses in the chosen voice, both
/// transcription streams, the given tools and instructions.
pub fn build_setup(model: &str, voice: &str, instructions: &str, tools: Vec<Tool>) -> SetupConfig {
    let voice = GeminiVoice::from_str_or_default(voice);
    SetupConfig {
        model: model_resource(model),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice.as_str().to_string(),
                    },
                },
            }),
        },
        system_instruction: (!instructions.trim().is_empty()).then(|| Content::text(instructions)),
        tools,
        input_audio_transcription: Some(AudioTranscriptionConfig::default()),
        output_audio_transcription: Some(AudioTranscriptionConfig::default()),
    }
}
