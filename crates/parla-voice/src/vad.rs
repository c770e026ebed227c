//! Voice Activity Detection
//!
//! `VoiceActivityDetector` is the per-frame speech/non-speech contract. The
//! WebRTC detector only accepts 10/20/30ms windows, so frames of arbitrary
//! size (e.g. 512 samples) are split into 10ms windows and voted on.

use crate::audio::AudioFrame;
use crate::error::{VoiceError, VoiceResult};
use tracing::{debug, info};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Capability contract: decide whether one frame contains speech.
///
/// Called once per frame at real-time rate. Errors are absorbed by the engine
/// and treated as "no speech".
pub trait VoiceActivityDetector {
    fn is_speech(&mut self, frame: &AudioFrame, sample_rate: u32) -> VoiceResult<bool>;

    fn release(&mut self) -> VoiceResult<()> {
        Ok(())
    }
}

/// Configuration for VAD detection
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Sample rate (must be 8000, 16000, 32000, or 48000 Hz for WebRTC VAD)
    pub sample_rate: u32,

    /// Detection mode (0-3, where 3 is most aggressive)
    pub mode: u8,

    /// Fraction of 10ms windows that must be voiced for the frame to count as speech
    pub voiced_ratio: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            mode: 2,
            voiced_ratio: 0.5,
        }
    }
}

fn webrtc_mode(mode: u8) -> VadMode {
    match mode {
        0 => VadMode::Quality,
        1 => VadMode::LowBitrate,
        2 => VadMode::Aggressive,
        _ => VadMode::VeryAggressive,
    }
}

fn webrtc_rate(sample_rate: u32) -> VoiceResult<SampleRate> {
    match sample_rate {
        8000 => Ok(SampleRate::Rate8kHz),
        16000 => Ok(SampleRate::Rate16kHz),
        32000 => Ok(SampleRate::Rate32kHz),
        48000 => Ok(SampleRate::Rate48kHz),
        other => Err(VoiceError::Config(format!(
            "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
            other
        ))),
    }
}

/// Voice Activity Detector using WebRTC VAD
pub struct WebRtcDetector {
    vad: Vad,
    config: VadConfig,
    window: usize,
}

impl WebRtcDetector {
    /// Create a new VAD detector with the given configuration
    pub fn new(config: VadConfig) -> VoiceResult<Self> {
        info!(
            "Initializing WebRTC VAD (sample_rate: {}Hz, mode: {})",
            config.sample_rate, config.mode
        );

        if config.mode > 3 {
            return Err(VoiceError::Config(format!(
                "VAD mode must be 0-3, got {}",
                config.mode
            )));
        }
        if !(0.0..=1.0).contains(&config.voiced_ratio) {
            return Err(VoiceError::Config(format!(
                "VAD voiced_ratio must be within 0.0-1.0, got {}",
                config.voiced_ratio
            )));
        }

        let rate = webrtc_rate(config.sample_rate)?;
        let mut vad = Vad::new();
        vad.set_mode(webrtc_mode(config.mode));
        vad.set_sample_rate(rate);

        // 10ms windows: 160 samples at 16kHz
        let window = (config.sample_rate / 100) as usize;

        Ok(Self {
            vad,
            config,
            window,
        })
    }

    /// Samples per 10ms analysis window
    pub fn window_size(&self) -> usize {
        self.window
    }
}

impl VoiceActivityDetector for WebRtcDetector {
    fn is_speech(&mut self, frame: &AudioFrame, sample_rate: u32) -> VoiceResult<bool> {
        if sample_rate != self.config.sample_rate {
            return Err(VoiceError::Detection(format!(
                "detector configured for {}Hz, frame is {}Hz",
                self.config.sample_rate, sample_rate
            )));
        }
        let samples = frame.samples();
        if samples.len() < self.window {
            return Err(VoiceError::Detection(format!(
                "Expected at least {} samples, got {}",
                self.window,
                samples.len()
            )));
        }

        // Trailing samples that do not fill a window are ignored.
        let mut voiced = 0usize;
        let mut windows = 0usize;
        for chunk in samples.chunks_exact(self.window) {
            let pcm: Vec<i16> = chunk
                .iter()
                .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                .collect();
            let is_voice = self
                .vad
                .is_voice_segment(&pcm)
                .map_err(|e| VoiceError::Detection(format!("VAD processing failed: {:?}", e)))?;
            windows += 1;
            if is_voice {
                voiced += 1;
            }
        }

        let speech = voiced as f32 / windows as f32 >= self.config.voiced_ratio && voiced > 0;
        debug!(voiced, windows, speech, "VAD frame");
        Ok(speech)
    }
}

/// RMS threshold detector. No model, useful on hosts where WebRTC VAD
/// rejects the sample rate.
#[derive(Debug, Clone)]
pub struct EnergyDetector {
    threshold: f32,
}

impl EnergyDetector {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyDetector {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl VoiceActivityDetector for EnergyDetector {
    fn is_speech(&mut self, frame: &AudioFrame, _sample_rate: u32) -> VoiceResult<bool> {
        if frame.is_empty() {
            return Err(VoiceError::Detection("empty frame".to_string()));
        }
        Ok(frame.rms() > self.threshold)
    }
}
