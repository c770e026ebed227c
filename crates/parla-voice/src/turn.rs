//! Turn-taking: deciding when the user has finished speaking.
//!
//! The endpointer is a two-state machine fed one frame and one VAD decision at
//! a time. Speech opens an utterance; while capturing, every frame is kept and
//! consecutive non-speech frames are counted. One frame past the silence
//! threshold the utterance is handed out and the machine returns to listening.

use crate::audio::AudioFrame;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Endpointer state. The utterance buffer is non-empty exactly when `Capturing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Waiting for speech; frames are discarded.
    Listening,
    /// Speech seen; frames are buffered until the silence threshold is exceeded.
    Capturing,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Listening => "listening",
            EngineState::Capturing => "capturing",
        }
    }
}

/// Ordered frames from speech onset through the endpointing silence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
}

impl Utterance {
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(AudioFrame::len).sum()
    }

    /// All frames concatenated in capture order.
    pub fn samples(&self) -> Vec<f32> {
        let mut samples = Vec::with_capacity(self.sample_count());
        for frame in &self.frames {
            samples.extend_from_slice(frame.samples());
        }
        samples
    }

    fn push(&mut self, frame: AudioFrame) {
        self.frames.push(frame);
    }
}

/// Configuration for turn detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnConfig {
    /// Consecutive non-speech frames tolerated inside an utterance. The
    /// endpoint fires on the first silent frame beyond this count.
    pub silence_threshold: u32,

    /// Most recent listening frames prepended when speech starts (default: 0)
    pub preroll_frames: usize,

    /// Force an endpoint once the utterance holds this many frames
    pub max_utterance_frames: Option<usize>,
}

impl TurnConfig {
    /// Roughly one second of trailing silence: `round(sample_rate / frame_size)`,
    /// never below 1.
    pub fn from_rates(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            silence_threshold: default_silence_threshold(sample_rate, frame_size),
            preroll_frames: 0,
            max_utterance_frames: None,
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self::from_rates(16000, 512)
    }
}

/// `round(sample_rate / frame_size)`, clamped to at least 1.
pub fn default_silence_threshold(sample_rate: u32, frame_size: usize) -> u32 {
    if frame_size == 0 {
        return 1;
    }
    let frames = (sample_rate as f64 / frame_size as f64).round() as u32;
    frames.max(1)
}

/// Frame-by-frame endpointing state machine.
#[derive(Debug)]
pub struct Endpointer {
    config: TurnConfig,
    state: EngineState,
    utterance: Utterance,
    silence: u32,
    preroll: VecDeque<AudioFrame>,
}

impl Endpointer {
    pub fn new(config: TurnConfig) -> Self {
        let preroll = VecDeque::with_capacity(config.preroll_frames);
        Self {
            config,
            state: EngineState::Listening,
            utterance: Utterance::default(),
            silence: 0,
            preroll,
        }
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Frames buffered in the current utterance.
    pub fn utterance_len(&self) -> usize {
        self.utterance.len()
    }

    /// Consecutive non-speech frames since the last speech frame.
    pub fn silence_count(&self) -> u32 {
        self.silence
    }

    /// Feed one frame with its speech decision. Returns the finished utterance
    /// when this frame completes it; the endpointer is already reset by then.
    pub fn push(&mut self, frame: AudioFrame, is_speech: bool) -> Option<Utterance> {
        match (self.state, is_speech) {
            (EngineState::Listening, true) => {
                info!("Speech started");
                self.state = EngineState::Capturing;
                self.silence = 0;
                for buffered in self.preroll.drain(..) {
                    self.utterance.push(buffered);
                }
                self.utterance.push(frame);
            }
            (EngineState::Listening, false) => {
                if self.config.preroll_frames > 0 {
                    if self.preroll.len() == self.config.preroll_frames {
                        self.preroll.pop_front();
                    }
                    self.preroll.push_back(frame);
                }
                return None;
            }
            (EngineState::Capturing, true) => {
                self.utterance.push(frame);
                self.silence = 0;
            }
            (EngineState::Capturing, false) => {
                self.utterance.push(frame);
                self.silence += 1;
                if self.silence > self.config.silence_threshold {
                    debug!(
                        frames = self.utterance.len(),
                        silence = self.silence,
                        "Silence threshold exceeded"
                    );
                    return Some(self.commit());
                }
            }
        }

        if let Some(max) = self.config.max_utterance_frames {
            if self.utterance.len() >= max {
                warn!(frames = self.utterance.len(), "Max utterance length reached, committing");
                return Some(self.commit());
            }
        }
        None
    }

    /// Drop any partial utterance and return to listening.
    pub fn reset(&mut self) {
        self.state = EngineState::Listening;
        self.utterance = Utterance::default();
        self.silence = 0;
        self.preroll.clear();
    }

    fn commit(&mut self) -> Utterance {
        let utterance = std::mem::take(&mut self.utterance);
        info!(
            frames = utterance.len(),
            samples = utterance.sample_count(),
            "Turn committed"
        );
        self.reset();
        utterance
    }
}
