//! Runtime configuration and provider construction.
//!
//! Precedence (lowest first): built-in defaults, the TOML file named by
//! `PARLA_CONFIG` (default `config/parla`, extension optional), then `PARLA_*`
//! environment variables with `__` between nested keys, e.g.
//! `PARLA_STT__API_KEY` or `PARLA_SILENCE_THRESHOLD`.

use crate::audio::{AudioConfig, AudioSource, CpalSource};
use crate::error::{VoiceError, VoiceResult};
use crate::llm::{
    EchoGenerator, OllamaGenerator, ResponseGenerator, DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL,
};
use crate::orchestrator::{AssistantConfig, CaptureProviders};
use crate::profile::{LanguageProfile, ProfileRegistry, DEFAULT_LANGUAGE};
use crate::stt::{HttpTranscriber, PlaceholderTranscriber, Transcriber};
use crate::tts::{HttpTts, LogSynthesizer, PlaybackSynthesizer, SpeechSynthesizer};
use crate::turn::{default_silence_threshold, TurnConfig};
use crate::vad::{EnergyDetector, VadConfig, VoiceActivityDetector, WebRtcDetector};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "PARLA_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/parla";
const ENV_PREFIX: &str = "PARLA";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// How the loop overlaps capture with turn processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One thread: capture pauses while a turn is processed.
    #[default]
    Sequential,
    /// Capture keeps running on its own thread; the newest utterance wins.
    Concurrent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadBackend {
    #[default]
    Webrtc,
    Energy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSection {
    pub backend: VadBackend,
    /// WebRTC aggressiveness 0-3
    pub mode: u8,
    /// Fraction of 10 ms windows that must be voiced
    pub voiced_ratio: f32,
    /// RMS threshold for the energy backend
    pub energy_threshold: f32,
}

impl Default for VadSection {
    fn default() -> Self {
        Self {
            backend: VadBackend::Webrtc,
            mode: 2,
            voiced_ratio: 0.5,
            energy_threshold: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttBackend {
    #[default]
    Http,
    Whisper,
    Placeholder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttSection {
    pub backend: SttBackend,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// ggml model file for the `whisper` backend
    pub whisper_model_path: Option<PathBuf>,
    /// Fixed transcript for the `placeholder` backend
    pub placeholder_response: Option<String>,
}

impl Default for SttSection {
    fn default() -> Self {
        Self {
            backend: SttBackend::Http,
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            timeout_secs: 30,
            whisper_model_path: None,
            placeholder_response: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Ollama,
    Echo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub backend: LlmBackend,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Conversation messages kept between turns
    pub max_history: usize,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Ollama,
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            timeout_secs: 60,
            max_history: 40,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsBackendKind {
    #[default]
    Http,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSection {
    pub backend: TtsBackendKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub timeout_secs: u64,
}

impl Default for TtsSection {
    fn default() -> Self {
        Self {
            backend: TtsBackendKind::Http,
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: None,
            model: "tts-1".to_string(),
            voice: "nova".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Top-level configuration for the `parla` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    /// Overrides `round(sample_rate / frame_size)`.
    #[serde(default)]
    pub silence_threshold: Option<u32>,
    #[serde(default)]
    pub preroll_frames: usize,
    #[serde(default)]
    pub max_utterance_frames: Option<usize>,
    pub language: String,
    pub log_level: String,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub speak_not_understood: bool,
    /// TOML file with extra language profiles.
    #[serde(default)]
    pub profiles_path: Option<PathBuf>,
    #[serde(default)]
    pub vad: VadSection,
    #[serde(default)]
    pub stt: SttSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub tts: TtsSection,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 512,
            silence_threshold: None,
            preroll_frames: 0,
            max_utterance_frames: None,
            language: DEFAULT_LANGUAGE.to_string(),
            log_level: "info".to_string(),
            mode: RunMode::Sequential,
            speak_not_understood: false,
            profiles_path: None,
            vad: VadSection::default(),
            stt: SttSection::default(),
            llm: LlmSection::default(),
            tts: TtsSection::default(),
        }
    }
}

impl VoiceConfig {
    /// Load from `PARLA_CONFIG` (or `config/parla` if present) and the environment.
    pub fn load() -> VoiceResult<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load_from(Some(Path::new(path.trim()))),
            _ => Self::load_from(None),
        }
    }

    /// Load with an explicit file, which must then exist. Without one, the
    /// default path is used if present.
    pub fn load_from(path: Option<&Path>) -> VoiceResult<Self> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("sample_rate", defaults.sample_rate as i64)?
            .set_default("frame_size", defaults.frame_size as i64)?
            .set_default("language", defaults.language.as_str())?
            .set_default("log_level", defaults.log_level.as_str())?;

        let builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => {
                builder.add_source(config::File::with_name(DEFAULT_CONFIG_PATH).required(false))
            }
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VoiceResult<()> {
        if self.sample_rate == 0 {
            return Err(VoiceError::Config("sample_rate must be non-zero".to_string()));
        }
        if self.frame_size == 0 {
            return Err(VoiceError::Config("frame_size must be non-zero".to_string()));
        }
        if self.silence_threshold == Some(0) {
            return Err(VoiceError::Config(
                "silence_threshold must be at least 1 frame".to_string(),
            ));
        }
        if self.max_utterance_frames == Some(0) {
            return Err(VoiceError::Config(
                "max_utterance_frames must be at least 1 frame".to_string(),
            ));
        }
        if let Some(max) = self.max_utterance_frames {
            if self.preroll_frames >= max {
                return Err(VoiceError::Config(format!(
                    "preroll_frames ({}) must be below max_utterance_frames ({})",
                    self.preroll_frames, max
                )));
            }
        }
        if self.vad.mode > 3 {
            return Err(VoiceError::Config(format!(
                "vad.mode must be 0-3, got {}",
                self.vad.mode
            )));
        }
        if !(self.vad.voiced_ratio > 0.0 && self.vad.voiced_ratio <= 1.0) {
            return Err(VoiceError::Config(format!(
                "vad.voiced_ratio must be in (0, 1], got {}",
                self.vad.voiced_ratio
            )));
        }
        Ok(())
    }

    /// Configured threshold, or about one second of frames.
    pub fn silence_threshold(&self) -> u32 {
        self.silence_threshold
            .unwrap_or_else(|| default_silence_threshold(self.sample_rate, self.frame_size))
    }

    pub fn turn_config(&self) -> TurnConfig {
        TurnConfig {
            silence_threshold: self.silence_threshold(),
            preroll_frames: self.preroll_frames,
            max_utterance_frames: self.max_utterance_frames,
        }
    }

    pub fn assistant_config(&self) -> AssistantConfig {
        AssistantConfig {
            turn: self.turn_config(),
            speak_not_understood: self.speak_not_understood,
        }
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.sample_rate,
            frame_size: self.frame_size,
            ..AudioConfig::default()
        }
    }

    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            sample_rate: self.sample_rate,
            mode: self.vad.mode,
            voiced_ratio: self.vad.voiced_ratio,
        }
    }

    /// Built-in profiles plus `profiles_path`, if set.
    pub fn profiles(&self) -> VoiceResult<ProfileRegistry> {
        match &self.profiles_path {
            Some(path) => ProfileRegistry::load_file(path),
            None => Ok(ProfileRegistry::builtin()),
        }
    }

    // -------------------------------------------------------------------------
    // Provider construction
    // -------------------------------------------------------------------------

    pub fn build_audio(&self) -> VoiceResult<Box<dyn AudioSource>> {
        Ok(Box::new(CpalSource::new(self.audio_config())?))
    }

    pub fn build_detector(&self) -> VoiceResult<Box<dyn VoiceActivityDetector>> {
        Ok(match self.vad.backend {
            VadBackend::Webrtc => Box::new(WebRtcDetector::new(self.vad_config())?),
            VadBackend::Energy => Box::new(EnergyDetector::new(self.vad.energy_threshold)),
        })
    }

    /// Audio source and detector, for the capture thread in concurrent mode.
    pub fn build_capture(&self) -> VoiceResult<CaptureProviders> {
        Ok(CaptureProviders {
            audio: self.build_audio()?,
            detector: self.build_detector()?,
        })
    }

    pub fn build_transcriber(
        &self,
        profile: &LanguageProfile,
    ) -> VoiceResult<Box<dyn Transcriber>> {
        let stt = &self.stt;
        match stt.backend {
            SttBackend::Http => {
                let api_key = required_key(&stt.api_key, "stt.api_key", "PARLA_STT__API_KEY")?;
                let transcriber = HttpTranscriber::new(
                    stt.base_url.clone(),
                    api_key,
                    stt.model.clone(),
                    Duration::from_secs(stt.timeout_secs),
                )?
                .with_language(profile.transcription_language.clone());
                Ok(Box::new(transcriber))
            }
            SttBackend::Whisper => self.build_whisper(profile),
            SttBackend::Placeholder => Ok(Box::new(match &stt.placeholder_response {
                Some(response) => PlaceholderTranscriber::with_response(response.clone()),
                None => PlaceholderTranscriber::new(),
            })),
        }
    }

    #[cfg(feature = "whisper")]
    fn build_whisper(&self, profile: &LanguageProfile) -> VoiceResult<Box<dyn Transcriber>> {
        let path = self.stt.whisper_model_path.as_ref().ok_or_else(|| {
            VoiceError::Config(
                "stt.whisper_model_path is required for the whisper backend".to_string(),
            )
        })?;
        let transcriber = crate::stt::WhisperTranscriber::new(
            &path.to_string_lossy(),
            &profile.transcription_language,
        )?;
        Ok(Box::new(transcriber))
    }

    #[cfg(not(feature = "whisper"))]
    fn build_whisper(&self, _profile: &LanguageProfile) -> VoiceResult<Box<dyn Transcriber>> {
        Err(VoiceError::Config(
            "stt.backend = \"whisper\" requires building with --features whisper".to_string(),
        ))
    }

    pub fn build_generator(&self) -> VoiceResult<Box<dyn ResponseGenerator>> {
        let llm = &self.llm;
        Ok(match llm.backend {
            LlmBackend::Ollama => Box::new(
                OllamaGenerator::new(
                    llm.base_url.clone(),
                    llm.model.clone(),
                    Duration::from_secs(llm.timeout_secs),
                )?
                .with_max_history(llm.max_history),
            ),
            LlmBackend::Echo => Box::new(EchoGenerator),
        })
    }

    pub fn build_synthesizer(&self) -> VoiceResult<Box<dyn SpeechSynthesizer>> {
        let tts = &self.tts;
        Ok(match tts.backend {
            TtsBackendKind::Http => {
                let api_key = required_key(&tts.api_key, "tts.api_key", "PARLA_TTS__API_KEY")?;
                let backend = HttpTts::new(
                    tts.base_url.clone(),
                    api_key,
                    tts.model.clone(),
                    tts.voice.clone(),
                    Duration::from_secs(tts.timeout_secs),
                )?;
                Box::new(PlaybackSynthesizer::new(Box::new(backend)))
            }
            TtsBackendKind::Log => Box::new(LogSynthesizer),
        })
    }
}

fn required_key(value: &Option<String>, key: &str, env: &str) -> VoiceResult<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            VoiceError::Config(format!(
                "{} is required (set it in the config file or {})",
                key, env
            ))
        })
}
