//! Speech synthesis and playback.
//!
//! `SpeechSynthesizer` is the contract the pipeline calls: speak a reply and
//! block until playback has finished. `PlaybackSynthesizer` splits that into a
//! `TtsBackend` (text → encoded audio) and rodio playback. The output stream is
//! opened per reply, so the synthesizer holds no device handle between turns.

use crate::error::{VoiceError, VoiceResult};
use rodio::{OutputStream, Sink, Source};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info};

/// Capability contract: speak text in the given language, blocking until done.
pub trait SpeechSynthesizer {
    fn speak(&mut self, text: &str, language: &str) -> VoiceResult<()>;

    fn release(&mut self) -> VoiceResult<()> {
        Ok(())
    }
}

/// Backend that turns text into audio bytes (WAV/MP3).
pub trait TtsBackend {
    /// Return empty bytes to skip playback.
    fn synthesize(&self, text: &str, language: &str) -> VoiceResult<Vec<u8>>;
}

/// OpenAI-compatible speech API (`POST {base_url}/audio/speech`).
#[derive(Debug, Clone)]
pub struct HttpTts {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// TTS model: tts-1 (fast) or tts-1-hd (higher quality).
    pub model: String,
    /// Voice id (alloy, echo, fable, onyx, nova, shimmer, ...).
    pub voice: String,
    client: reqwest::blocking::Client,
}

impl HttpTts {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        timeout: Duration,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            client,
        })
    }
}

impl TtsBackend for HttpTts {
    fn synthesize(&self, text: &str, _language: &str) -> VoiceResult<Vec<u8>> {
        // The speech endpoint infers the language from the input text.
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "TTS API error {}: {}",
                status, body
            )));
        }
        let bytes = res.bytes().map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Synthesize through a backend, then play on the default output device until done.
pub struct PlaybackSynthesizer {
    backend: Box<dyn TtsBackend>,
}

impl PlaybackSynthesizer {
    pub fn new(backend: Box<dyn TtsBackend>) -> Self {
        Self { backend }
    }

    /// Decode and play pre-encoded audio bytes, blocking until the sink drains.
    pub fn play_bytes(bytes: Vec<u8>) -> VoiceResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let (_stream, handle) =
            OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = Sink::try_new(&handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        let source = rodio::Decoder::new(Cursor::new(bytes))
            .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
        sink.append(source.convert_samples::<f32>());
        sink.sleep_until_end();
        Ok(())
    }
}

impl SpeechSynthesizer for PlaybackSynthesizer {
    fn speak(&mut self, text: &str, language: &str) -> VoiceResult<()> {
        let bytes = self.backend.synthesize(text, language)?;
        debug!(bytes = bytes.len(), language, "Playing synthesized reply");
        Self::play_bytes(bytes).map_err(|e| VoiceError::Synthesis(e.to_string()))
    }
}

/// Placeholder synthesizer: logs the reply instead of playing it.
#[derive(Debug, Default)]
pub struct LogSynthesizer;

impl SpeechSynthesizer for LogSynthesizer {
    fn speak(&mut self, text: &str, language: &str) -> VoiceResult<()> {
        info!(language, "Assistant (not voiced): {}", text);
        Ok(())
    }
}
