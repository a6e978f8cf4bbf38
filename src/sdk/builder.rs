use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::capture::CaptureDevice;
use crate::audio::frame::DEFAULT_FRAME_SAMPLES;
use crate::audio::playback::{MonotonicClock, PlaybackClock, PlaybackSink};
use crate::protocol::models::{
    AudioTranscriptionConfig, Content, DEFAULT_MODEL, GenerationConfig, INPUT_SAMPLE_RATE,
    Modality, OUTPUT_SAMPLE_RATE, SetupConfig, SpeechConfig,
};
use crate::{Error, Result};

use super::agent::LiveAgent;
use super::handlers::EventHandlers;
use super::modes::AgentMode;
use super::tools;
use super::transcript::DEFAULT_MAX_TRANSCRIPT_CHARS;
use super::transmit::DEFAULT_TRANSMIT_CAPACITY;
use super::transport::{Connector, WsConnector};

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_PREAMBLE: &str = "You are a creative partner in a live writers' room for a \
    tabletop campaign. Speak concisely. The user shares the script they are editing; \
    ground your answers in it.";

/// Produces a fresh capture device for each connect.
pub type CaptureFactory = Arc<dyn Fn() -> Result<Box<dyn CaptureDevice>> + Send + Sync>;
/// Produces a fresh playback sink for each connect.
pub type SinkFactory = Arc<dyn Fn() -> Result<Box<dyn PlaybackSink>> + Send + Sync>;

/// Session settings. Serializable so hosts can keep them in a config file;
/// the API key is never written out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub voice: Option<String>,
    pub response_modality: Modality,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_samples: usize,
    pub transmit_capacity: usize,
    pub event_capacity: usize,
    pub playback_tick_ms: u64,
    /// `None` waits for the setup acknowledgement indefinitely.
    pub handshake_timeout_ms: Option<u64>,
    pub max_transcript_chars: usize,
    pub initial_mode: AgentMode,
    pub system_preamble: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            voice: None,
            response_modality: Modality::Audio,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            transmit_capacity: DEFAULT_TRANSMIT_CAPACITY,
            event_capacity: 256,
            playback_tick_ms: 50,
            handshake_timeout_ms: Some(10_000),
            max_transcript_chars: DEFAULT_MAX_TRANSCRIPT_CHARS,
            initial_mode: AgentMode::default(),
            system_preamble: DEFAULT_PREAMBLE.to_string(),
        }
    }
}

impl LiveConfig {
    #[must_use]
    pub fn playback_tick(&self) -> Duration {
        Duration::from_millis(self.playback_tick_ms.max(1))
    }

    #[must_use]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    /// # Errors
    /// Returns [`Error::Config`] for values the session cannot run with.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::Config("model must not be empty".to_string()));
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }
        if self.frame_samples == 0 || self.transmit_capacity == 0 || self.event_capacity == 0 {
            return Err(Error::Config(
                "frame size and queue capacities must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Setup message for a new connection in `mode`.
    ///
    /// # Errors
    /// Returns an error if the tool schemas fail to serialize.
    #[allow(clippy::result_large_err)]
    pub fn setup(&self, mode: AgentMode) -> Result<SetupConfig> {
        let mut setup = SetupConfig::new(&self.model);
        setup.generation_config = Some(GenerationConfig {
            response_modalities: vec![self.response_modality],
            speech_config: self.voice.as_deref().map(SpeechConfig::voice),
        });
        setup.system_instruction = Some(Content::instruction(format!(
            "{}\n\n{}",
            self.system_preamble,
            mode.switch_note()
        )));
        setup.tools = tools::declarations()?;
        setup.input_audio_transcription = Some(AudioTranscriptionConfig {});
        setup.output_audio_transcription = Some(AudioTranscriptionConfig {});
        Ok(setup)
    }
}

/// Builder for [`LiveAgent`].
pub struct LiveBuilder {
    config: LiveConfig,
    connector: Option<Arc<dyn Connector>>,
    capture: Option<CaptureFactory>,
    sink: Option<SinkFactory>,
    clock: Option<Arc<dyn PlaybackClock>>,
    handlers: EventHandlers,
    rng_seed: Option<u64>,
}

impl std::fmt::Debug for LiveBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBuilder")
            .field("config", &self.config)
            .field("connector", &self.connector.is_some())
            .field("capture", &self.capture.is_some())
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl LiveBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: LiveConfig::default(),
            connector: None,
            capture: None,
            sink: None,
            clock: None,
            handlers: EventHandlers::new(),
            rng_seed: None,
        }
    }

    /// Replace every setting at once, e.g. with one loaded from a file.
    #[must_use]
    pub fn config(mut self, config: LiveConfig) -> Self {
        let api_key = self.config.api_key.take();
        self.config = config;
        if self.config.api_key.is_none() {
            self.config.api_key = api_key;
        }
        self
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Read the key from `GEMINI_API_KEY`. Leaves the key unset if the
    /// variable is missing.
    #[must_use]
    pub fn api_key_from_env(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            self.config.api_key = Some(key);
        }
        self
    }

    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    #[must_use]
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.voice = Some(voice.into());
        self
    }

    #[must_use]
    pub const fn output_text(mut self) -> Self {
        self.config.response_modality = Modality::Text;
        self
    }

    /// Rate and frame size of the outbound microphone stream. Device audio is
    /// resampled and re-chunked to match.
    #[must_use]
    pub const fn input_format(mut self, sample_rate: u32, frame_samples: usize) -> Self {
        self.config.input_sample_rate = sample_rate;
        self.config.frame_samples = frame_samples;
        self
    }

    #[must_use]
    pub const fn mode(mut self, mode: AgentMode) -> Self {
        self.config.initial_mode = mode;
        self
    }

    #[must_use]
    pub fn system_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.config.system_preamble = preamble.into();
        self
    }

    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.handshake_timeout_ms =
            timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub const fn max_transcript_chars(mut self, max: usize) -> Self {
        self.config.max_transcript_chars = max;
        self
    }

    #[must_use]
    pub const fn transmit_capacity(mut self, capacity: usize) -> Self {
        self.config.transmit_capacity = capacity;
        self
    }

    /// Use a custom transport, e.g. an in-process mock.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn capture_device<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn CaptureDevice>> + Send + Sync + 'static,
    {
        self.capture = Some(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn playback_sink<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn PlaybackSink>> + Send + Sync + 'static,
    {
        self.sink = Some(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn PlaybackClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Seed the dice for reproducible rolls.
    #[must_use]
    pub const fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// # Errors
    /// Returns [`Error::Config`] if the settings are invalid or neither an API
    /// key nor a custom connector was given.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<LiveAgent> {
        self.config.validate()?;
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => {
                let key = self
                    .config
                    .api_key
                    .clone()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| Error::Config(format!("api key required (set {API_KEY_ENV})")))?;
                Arc::new(WsConnector::new(key, self.config.base_url.clone()))
            }
        };
        let capture = self.capture.or_else(|| default_capture(&self.config));
        let sink = self.sink.unwrap_or_else(default_sink);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        Ok(LiveAgent::from_parts(
            self.config,
            connector,
            capture,
            sink,
            clock,
            self.handlers,
            self.rng_seed,
        ))
    }
}

impl Default for LiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cpal")]
fn default_capture(config: &LiveConfig) -> Option<CaptureFactory> {
    let (rate, frame_samples) = (config.input_sample_rate, config.frame_samples);
    Some(Arc::new(move || {
        let device = crate::audio::cpal_device::CpalCaptureDevice::new(None)
            .with_format(rate, frame_samples);
        Ok(Box::new(device) as Box<dyn CaptureDevice>)
    }))
}

#[cfg(not(feature = "cpal"))]
const fn default_capture(_config: &LiveConfig) -> Option<CaptureFactory> {
    None
}

#[cfg(feature = "cpal")]
fn default_sink() -> SinkFactory {
    Arc::new(|| {
        Ok(Box::new(crate::audio::cpal_device::CpalPlaybackSink::open_default()?)
            as Box<dyn PlaybackSink>)
    })
}

#[cfg(not(feature = "cpal"))]
fn default_sink() -> SinkFactory {
    Arc::new(|| Ok(Box::new(crate::audio::playback::NullSink) as Box<dyn PlaybackSink>))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_key_or_connector() {
        let err = LiveBuilder::new().build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn setup_carries_mode_tools_and_transcription() {
        let config = LiveConfig {
            voice: Some("Puck".to_string()),
            ..LiveConfig::default()
        };
        let setup = config.setup(AgentMode::Director).unwrap();
        let json = serde_json::to_value(&setup).unwrap();
        assert_eq!(json["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        let instruction = json["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(instruction.contains("DIRECTOR"));
        assert_eq!(json["tools"][0]["functionDeclarations"].as_array().unwrap().len(), 2);
        assert!(json["inputAudioTranscription"].is_object());
    }

    #[test]
    fn config_round_trips_without_the_key() {
        let config = LiveConfig {
            api_key: Some("secret".to_string()),
            initial_mode: AgentMode::Editor,
            ..LiveConfig::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        assert!(!text.contains("secret"));
        let back: LiveConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.initial_mode, AgentMode::Editor);
        assert!(back.api_key.is_none());

        let partial: LiveConfig = serde_json::from_str(r#"{"voice":"Kore"}"#).unwrap();
        assert_eq!(partial.model, DEFAULT_MODEL);
    }
}
