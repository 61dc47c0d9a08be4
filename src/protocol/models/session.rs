use serde::{Deserialize, Serialize};

use super::{
    AudioFormat, InputAudioTranscription, MaxTokens, Modality, Temperature, Tool, ToolChoice,
    TurnDetection,
};

/// Session configuration as sent in `session.update` and echoed back by the server.
///
/// Every field is optional; omitted fields are left untouched by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<Modality>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<AudioFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<AudioFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Temperature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl SessionConfig {
    /// Overlays every field set in `update` onto `self`.
    #[must_use]
    pub fn merged(&self, update: &Self) -> Self {
        Self {
            modalities: update.modalities.clone().or_else(|| self.modalities.clone()),
            instructions: update
                .instructions
                .clone()
                .or_else(|| self.instructions.clone()),
            voice: update.voice.clone().or_else(|| self.voice.clone()),
            input_audio_format: update.input_audio_format.or(self.input_audio_format),
            output_audio_format: update.output_audio_format.or(self.output_audio_format),
            input_audio_transcription: update
                .input_audio_transcription
                .clone()
                .or_else(|| self.input_audio_transcription.clone()),
            turn_detection: update
                .turn_detection
                .clone()
                .or_else(|| self.turn_detection.clone()),
            tools: update.tools.clone().or_else(|| self.tools.clone()),
            tool_choice: update.tool_choice.clone().or_else(|| self.tool_choice.clone()),
            temperature: update.temperature.or(self.temperature),
            max_response_output_tokens: update
                .max_response_output_tokens
                .or(self.max_response_output_tokens),
        }
    }
}

/// Server-side session object carried by `session.created` / `session.updated`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    #[serde(default = "default_session_object")]
    pub object: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Flattened to match the API's session JSON shape.
    #[serde(flatten)]
    pub config: SessionConfig,
}

fn default_session_object() -> String {
    "realtime.session".to_string()
}
