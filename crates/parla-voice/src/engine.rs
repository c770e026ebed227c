//! Turn-taking engine: VAD, endpointing and the turn pipeline driven one frame at a time.

use crate::audio::AudioFrame;
use crate::pipeline::{TurnPipeline, TurnResult};
use crate::turn::{EngineState, Endpointer, TurnConfig, Utterance};
use crate::vad::VoiceActivityDetector;
use tracing::{debug, warn};

/// Frame-level decision half of the engine: detector plus endpointer.
///
/// Kept separate from the pipeline so the concurrent mode can run it on the
/// capture thread.
pub struct FrameGate {
    detector: Box<dyn VoiceActivityDetector>,
    endpointer: Endpointer,
    sample_rate: u32,
}

impl FrameGate {
    pub fn new(
        detector: Box<dyn VoiceActivityDetector>,
        turn: TurnConfig,
        sample_rate: u32,
    ) -> Self {
        Self {
            detector,
            endpointer: Endpointer::new(turn),
            sample_rate,
        }
    }

    /// Classify and feed one frame. A detector error counts as non-speech.
    pub fn push(&mut self, frame: AudioFrame) -> Option<Utterance> {
        let is_speech = match self.detector.is_speech(&frame, self.sample_rate) {
            Ok(speech) => speech,
            Err(e) => {
                warn!(
                    stage = e.stage(),
                    "Voice activity detection failed, treating frame as silence: {}",
                    e
                );
                false
            }
        };
        self.endpointer.push(frame, is_speech)
    }

    pub fn endpointer(&self) -> &Endpointer {
        &self.endpointer
    }

    pub fn release(&mut self) {
        if let Err(e) = self.detector.release() {
            warn!("VAD release failed: {}", e);
        }
    }
}

/// Owns one in-progress utterance and runs the pipeline synchronously when it ends.
pub struct TurnEngine {
    gate: FrameGate,
    pipeline: TurnPipeline,
    sample_rate: u32,
    turns: u64,
}

impl TurnEngine {
    pub fn new(gate: FrameGate, pipeline: TurnPipeline) -> Self {
        let sample_rate = gate.sample_rate;
        Self {
            gate,
            pipeline,
            sample_rate,
            turns: 0,
        }
    }

    /// Process one frame. Returns the turn outcome when this frame completed
    /// an utterance; the engine is back in `Listening` before the pipeline runs.
    pub fn process_frame(&mut self, frame: AudioFrame) -> Option<TurnResult> {
        let utterance = self.gate.push(frame)?;
        self.turns += 1;
        debug!(turn = self.turns, frames = utterance.len(), "Endpoint reached");
        self.pipeline.run(&utterance, self.sample_rate)
    }

    pub fn state(&self) -> EngineState {
        self.gate.endpointer().state()
    }

    pub fn utterance_len(&self) -> usize {
        self.gate.endpointer().utterance_len()
    }

    pub fn silence_count(&self) -> u32 {
        self.gate.endpointer().silence_count()
    }

    /// Completed utterances handed to the pipeline so far.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    pub fn pipeline(&self) -> &TurnPipeline {
        &self.pipeline
    }

    /// Release the detector, then the pipeline providers.
    pub fn release(&mut self) {
        self.gate.release();
        self.pipeline.release();
    }
}
