//! Error types for the Parla voice loop
//!
//! One variant per pipeline stage so every call site can decide explicitly
//! whether a failure is recoverable (absorbed into the turn) or fatal (startup).

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice loop
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Audio capture device or stream failure.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// Voice activity detection failed for a frame.
    #[error("VAD detection error: {0}")]
    Detection(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    /// The response generator (LLM) failed.
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// Output device could not be opened or audio could not be decoded.
    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Short stage label for structured log fields.
    pub fn stage(&self) -> &'static str {
        match self {
            VoiceError::Stream(_) => "stream",
            VoiceError::Detection(_) => "detection",
            VoiceError::Transcription(_) => "transcription",
            VoiceError::Generation(_) => "generation",
            VoiceError::Synthesis(_) => "synthesis",
            VoiceError::Playback(_) => "playback",
            VoiceError::Config(_) => "config",
            VoiceError::Io(_) => "io",
        }
    }
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::Stream(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::Stream(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::Stream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::Stream(err.to_string())
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}
