use crate::config::ClientConfig;
use crate::protocol::models::{
    AudioFormat, InputAudioTranscription, MaxTokens, Modality, SessionConfig, Temperature, Tool,
    ToolChoice, TurnDetection,
};
use crate::Result;
use std::time::Duration;

use super::{RealtimeClient, ToolRegistry};

pub struct Realtime;

impl Realtime {
    #[must_use]
    pub fn builder() -> RealtimeBuilder {
        RealtimeBuilder::new()
    }
}

#[derive(Debug, Default)]
pub struct RealtimeBuilder {
    config: ClientConfig,
    tools: ToolRegistry,
}

impl RealtimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Replaces the whole initial session configuration.
    #[must_use]
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.session.instructions = Some(instructions.into());
        self
    }

    #[must_use]
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.session.voice = Some(voice.into());
        self
    }

    #[must_use]
    pub fn modalities(mut self, modalities: impl IntoIterator<Item = Modality>) -> Self {
        self.config.session.modalities = Some(modalities.into_iter().collect());
        self
    }

    #[must_use]
    pub fn output_text(self) -> Self {
        self.modalities([Modality::Text])
    }

    #[must_use]
    pub fn output_audio(self) -> Self {
        self.modalities([Modality::Text, Modality::Audio])
    }

    #[must_use]
    pub fn audio_format(mut self, format: AudioFormat) -> Self {
        self.config.session.input_audio_format = Some(format);
        self.config.session.output_audio_format = Some(format);
        self
    }

    #[must_use]
    pub fn transcription(mut self, model: impl Into<String>) -> Self {
        self.config.session.input_audio_transcription = Some(InputAudioTranscription::model(model));
        self
    }

    #[must_use]
    pub fn turn_detection(mut self, turn_detection: TurnDetection) -> Self {
        self.config.session.turn_detection = Some(turn_detection);
        self
    }

    #[must_use]
    pub fn tool_choice(mut self, choice: impl Into<ToolChoice>) -> Self {
        self.config.session.tool_choice = Some(choice.into());
        self
    }

    #[must_use]
    pub fn temperature(mut self, temperature: Temperature) -> Self {
        self.config.session.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn max_output_tokens(mut self, max: impl Into<MaxTokens>) -> Self {
        self.config.session.max_response_output_tokens = Some(max.into());
        self
    }

    /// A tool definition the server sees but this client does not handle.
    #[must_use]
    pub fn tool_definition(mut self, tool: Tool) -> Self {
        self.config.session.tools.get_or_insert_with(Vec::new).push(tool);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub const fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    #[must_use]
    pub const fn side_table_capacity(mut self, capacity: usize) -> Self {
        self.config.side_table_capacity = capacity;
        self
    }

    /// # Errors
    /// Returns `InvalidConfig` if the configuration does not validate.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<RealtimeClient> {
        self.config.validate()?;
        Ok(RealtimeClient::with_tools(self.config, self.tools))
    }

    /// Builds and connects over WebSocket.
    ///
    /// # Errors
    /// Configuration or connection errors, see [`RealtimeClient::connect`].
    pub async fn connect(self) -> Result<RealtimeClient> {
        let mut client = self.build()?;
        client.connect().await?;
        Ok(client)
    }
}
