//! Speech-to-text: turn an utterance's PCM into text.
//!
//! `Transcriber` is the contract the pipeline calls once per turn. Backends:
//! an OpenAI-compatible HTTP endpoint, local Whisper (feature `whisper`), and a
//! placeholder that returns a fixed string.

use crate::error::{VoiceError, VoiceResult};
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

/// Capability contract for transcription.
pub trait Transcriber {
    /// Transcribe mono f32 PCM. An empty string means nothing intelligible was
    /// heard; it is not an error.
    fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> VoiceResult<String>;

    fn release(&mut self) -> VoiceResult<()> {
        Ok(())
    }
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for API upload.
pub fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> VoiceResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceError::Transcription(format!("WAV encode failed: {}", e)))?;
        for &s in samples {
            let pcm = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            writer
                .write_sample(pcm)
                .map_err(|e| VoiceError::Transcription(format!("WAV encode failed: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Transcription(format!("WAV encode failed: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

/// Placeholder transcriber: returns a fixed string. Use for exercising the loop without a model.
#[derive(Debug, Default)]
pub struct PlaceholderTranscriber {
    /// If set, return this instead of the default message.
    pub response: Option<String>,
}

impl PlaceholderTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

impl Transcriber for PlaceholderTranscriber {
    fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
        if let Some(ref r) = self.response {
            return Ok(r.clone());
        }
        let secs = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f32 / sample_rate as f32
        };
        Ok(format!(
            "[transcription placeholder: {} samples, {:.1}s]",
            samples.len(),
            secs
        ))
    }
}

/// OpenAI-compatible transcription API (`POST {base_url}/audio/transcriptions`).
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model: whisper-1, gpt-4o-transcribe, etc.
    pub model: String,
    /// ISO-639-1 language hint from the active profile.
    pub language: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpTranscriber {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            language: None,
            client,
        })
    }

    /// Set the language hint sent with every request.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        let language = language.into();
        self.language = if language.trim().is_empty() {
            None
        } else {
            Some(language)
        };
        self
    }
}

impl Transcriber for HttpTranscriber {
    fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_f32_to_wav(samples, sample_rate)?;
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        let mut form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if let Some(ref language) = self.language {
            form = form.text("language", language.clone());
        }
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Transcription(format!(
                "STT API error {}: {}",
                status, body
            )));
        }
        let json: serde_json::Value = res
            .json()
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        debug!(chars = text.len(), "Transcription received");
        Ok(text)
    }
}

// -----------------------------------------------------------------------------
// Local Whisper STT (optional feature). Requires whisper.cpp/ggml.
// -----------------------------------------------------------------------------
#[cfg(feature = "whisper")]
mod whisper_stt {
    use super::*;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Local Whisper: loads a ggml model (e.g. ggml-base.bin) and runs inference
    /// on-device. Audio must be 16 kHz mono f32.
    pub struct WhisperTranscriber {
        #[allow(dead_code)]
        context: WhisperContext,
        state: whisper_rs::WhisperState,
        language: String,
    }

    impl WhisperTranscriber {
        /// Load the model from `model_path`; `language` is the profile's transcription hint.
        pub fn new(model_path: &str, language: &str) -> VoiceResult<Self> {
            let params = WhisperContextParameters::default();
            let context = WhisperContext::new_with_params(model_path, params)
                .map_err(|e| VoiceError::Transcription(format!("Whisper load failed: {}", e)))?;
            let state = context.create_state().map_err(|e| {
                VoiceError::Transcription(format!("Whisper state init failed: {}", e))
            })?;
            Ok(Self {
                context,
                state,
                language: language.to_string(),
            })
        }
    }

    impl Transcriber for WhisperTranscriber {
        fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
            if samples.is_empty() {
                return Ok(String::new());
            }
            if sample_rate != 16000 {
                return Err(VoiceError::Transcription(format!(
                    "Whisper expects 16 kHz; got {} Hz",
                    sample_rate
                )));
            }
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_no_timestamps(true);
            params.set_language(Some(self.language.as_str()));

            self.state
                .full(&params, samples)
                .map_err(|e| VoiceError::Transcription(format!("Whisper inference failed: {}", e)))?;
            let text = self
                .state
                .as_iter()
                .filter_map(|seg| seg.to_str().ok().map(str::to_string))
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string();
            Ok(text)
        }
    }
}

#[cfg(feature = "whisper")]
pub use whisper_stt::WhisperTranscriber;
