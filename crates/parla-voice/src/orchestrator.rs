//! Voice Assistant - lifecycle of the listening loop
//!
//! Ties an audio source, the turn engine and the providers together:
//! start the stream, run frames through the engine until asked to stop, then
//! release everything in a fixed order exactly once.
//!
//! Two modes:
//! - sequential (`VoiceAssistant`): one thread reads, endpoints and runs the
//!   pipeline; audio arriving during a reply is the source's concern.
//! - concurrent (`run_concurrent`): a capture thread keeps reading while the
//!   calling thread runs one turn at a time; the newest utterance wins.

use crate::audio::{AudioFrame, AudioSource};
use crate::engine::{FrameGate, TurnEngine};
use crate::error::{VoiceError, VoiceResult};
use crate::filter::TextSanitizer;
use crate::handoff::UtteranceSlot;
use crate::llm::ResponseGenerator;
use crate::pipeline::{TurnPipeline, TurnResult};
use crate::profile::LanguageProfile;
use crate::stt::Transcriber;
use crate::tts::SpeechSynthesizer;
use crate::turn::{TurnConfig, Utterance};
use crate::vad::VoiceActivityDetector;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long the turn thread waits for an utterance before re-checking the stop signal.
const HANDOFF_POLL: Duration = Duration::from_millis(100);

/// Cloneable stop flag shared with signal handlers.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Trigger, returning whether a stop had already been requested.
    pub fn request(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Configuration for the voice assistant
#[derive(Debug, Clone, Default)]
pub struct AssistantConfig {
    pub turn: TurnConfig,
    /// Speak the profile's not-understood message on empty or failed transcription
    pub speak_not_understood: bool,
}

/// The six capability providers for one session.
pub struct Providers {
    pub audio: Box<dyn AudioSource>,
    pub detector: Box<dyn VoiceActivityDetector>,
    pub transcriber: Box<dyn Transcriber>,
    pub generator: Box<dyn ResponseGenerator>,
    pub sanitizer: Box<dyn TextSanitizer>,
    pub synthesizer: Box<dyn SpeechSynthesizer>,
}

/// Capture-side providers for the concurrent mode, built on the capture thread.
pub struct CaptureProviders {
    pub audio: Box<dyn AudioSource>,
    pub detector: Box<dyn VoiceActivityDetector>,
}

/// Sequential listening loop.
pub struct VoiceAssistant {
    audio: Box<dyn AudioSource>,
    engine: TurnEngine,
    released: bool,
}

impl VoiceAssistant {
    pub fn new(
        providers: Providers,
        profile: LanguageProfile,
        config: AssistantConfig,
    ) -> VoiceResult<Self> {
        let Providers {
            audio,
            detector,
            transcriber,
            generator,
            sanitizer,
            synthesizer,
        } = providers;

        validate_stream(audio.as_ref(), &config.turn)?;
        info!(
            sample_rate = audio.sample_rate(),
            frame_size = audio.frame_size(),
            silence_threshold = config.turn.silence_threshold,
            language = %profile.code,
            "Initializing voice assistant"
        );

        let gate = FrameGate::new(detector, config.turn, audio.sample_rate());
        let pipeline = TurnPipeline::new(transcriber, generator, sanitizer, synthesizer, profile)
            .with_speak_not_understood(config.speak_not_understood);

        Ok(Self {
            audio,
            engine: TurnEngine::new(gate, pipeline),
            released: false,
        })
    }

    pub fn engine(&self) -> &TurnEngine {
        &self.engine
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Start the audio stream. A failure here is fatal.
    pub fn start(&mut self) -> VoiceResult<()> {
        info!("Starting audio stream");
        self.audio.start()?;
        info!("Listening");
        Ok(())
    }

    /// Read and process frames until `stop` is raised. The signal is checked
    /// between frames, never in the middle of a turn.
    pub fn run(&mut self, stop: &StopSignal) {
        let sample_rate = self.audio.sample_rate();
        let frame_size = self.audio.frame_size();
        while !stop.is_triggered() {
            let frame = match self.audio.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(stage = e.stage(), "Frame read failed, substituting silence: {}", e);
                    AudioFrame::silent(frame_size, sample_rate)
                }
            };
            if let Some(result) = self.engine.process_frame(frame) {
                log_turn(&result);
            }
        }
        info!(turns = self.engine.turns(), "Stop requested");
    }

    /// Stop and release every provider. Best-effort and idempotent: failures
    /// are logged, a second call does nothing.
    pub fn cleanup(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        info!("Cleaning up");
        release_audio(self.audio.as_mut());
        self.engine.release();
        info!("Cleanup complete");
    }

    /// `start`, `run`, `cleanup`. Cleanup also runs when start fails; the
    /// start error is returned unchanged.
    pub fn run_until_stopped(&mut self, stop: &StopSignal) -> VoiceResult<()> {
        if let Err(e) = self.start() {
            error!(stage = e.stage(), "Startup failed: {}", e);
            self.cleanup();
            return Err(e);
        }
        self.run(stop);
        self.cleanup();
        Ok(())
    }
}

impl Drop for VoiceAssistant {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Run the concurrent mode until `stop` is raised. Returns the number of turns
/// processed.
///
/// `capture` runs on the capture thread, which owns the audio source and the
/// detector for their whole life (device handles are not `Send`). The calling
/// thread owns the pipeline.
pub fn run_concurrent<F>(
    capture: F,
    mut pipeline: TurnPipeline,
    turn: TurnConfig,
    stop: &StopSignal,
) -> VoiceResult<u64>
where
    F: FnOnce() -> VoiceResult<CaptureProviders> + Send + 'static,
{
    let slot: Arc<UtteranceSlot<(Utterance, u32)>> = Arc::new(UtteranceSlot::new());
    let capture_stop = StopSignal::new();
    let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<()>>();

    let handle = {
        let slot = Arc::clone(&slot);
        let outer_stop = stop.clone();
        let capture_stop = capture_stop.clone();
        thread::Builder::new()
            .name("parla-listener".to_string())
            .spawn(move || {
                capture_loop(capture, turn, &slot, ready_tx, &outer_stop, &capture_stop);
                slot.close();
            })?
    };

    let startup = ready_rx.recv().unwrap_or_else(|_| {
        Err(VoiceError::Stream(
            "capture thread exited during startup".to_string(),
        ))
    });
    if let Err(e) = startup {
        error!(stage = e.stage(), "Startup failed: {}", e);
        if handle.join().is_err() {
            error!("Capture thread panicked");
        }
        pipeline.release();
        return Err(e);
    }

    let mut turns = 0u64;
    while !stop.is_triggered() {
        match slot.take_blocking(HANDOFF_POLL) {
            Some((utterance, sample_rate)) => {
                if let Some(result) = pipeline.run(&utterance, sample_rate) {
                    turns += 1;
                    log_turn(&result);
                }
            }
            None if slot.is_closed() => {
                warn!("Capture thread stopped");
                break;
            }
            None => {}
        }
    }

    info!(turns, "Stop requested");
    capture_stop.trigger();
    slot.close();
    if handle.join().is_err() {
        error!("Capture thread panicked");
    }
    pipeline.release();
    info!("Cleanup complete");
    Ok(turns)
}

fn capture_loop<F>(
    capture: F,
    turn: TurnConfig,
    slot: &UtteranceSlot<(Utterance, u32)>,
    ready: mpsc::Sender<VoiceResult<()>>,
    stop: &StopSignal,
    capture_stop: &StopSignal,
) where
    F: FnOnce() -> VoiceResult<CaptureProviders>,
{
    let CaptureProviders { mut audio, detector } = match capture() {
        Ok(providers) => providers,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let sample_rate = audio.sample_rate();
    let frame_size = audio.frame_size();
    let started = validate_stream(audio.as_ref(), &turn).and_then(|_| audio.start());
    let mut gate = FrameGate::new(detector, turn, sample_rate);

    if let Err(e) = started {
        release_audio(audio.as_mut());
        gate.release();
        let _ = ready.send(Err(e));
        return;
    }
    let _ = ready.send(Ok(()));
    info!("Capture thread listening");

    while !stop.is_triggered() && !capture_stop.is_triggered() {
        let frame = match audio.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(stage = e.stage(), "Frame read failed, substituting silence: {}", e);
                AudioFrame::silent(frame_size, sample_rate)
            }
        };
        if let Some(utterance) = gate.push(frame) {
            if slot.put((utterance, sample_rate)) {
                warn!("Previous utterance still pending, replaced with the newest");
            }
        }
    }

    release_audio(audio.as_mut());
    gate.release();
}

fn validate_stream(audio: &dyn AudioSource, turn: &TurnConfig) -> VoiceResult<()> {
    if audio.sample_rate() == 0 || audio.frame_size() == 0 {
        return Err(VoiceError::Config(format!(
            "Sample rate ({}) and frame size ({}) must be non-zero",
            audio.sample_rate(),
            audio.frame_size()
        )));
    }
    if turn.silence_threshold == 0 {
        return Err(VoiceError::Config(
            "Silence threshold must be at least 1 frame".to_string(),
        ));
    }
    Ok(())
}

fn release_audio(audio: &mut dyn AudioSource) {
    if let Err(e) = audio.stop() {
        warn!("Audio stop failed: {}", e);
    }
    if let Err(e) = audio.release() {
        warn!("Audio release failed: {}", e);
    }
}

fn log_turn(result: &TurnResult) {
    match result {
        TurnResult::Replied {
            transcript,
            reply,
            spoken,
            ..
        } => info!(transcript = %transcript, reply = %reply, spoken, "Turn complete"),
        TurnResult::Fallback {
            transcript,
            spoken,
            ..
        } => warn!(transcript = %transcript, spoken, "Turn answered with fallback message"),
        TurnResult::TranscriptionEmpty { .. } => info!("Turn skipped: nothing transcribed"),
        TurnResult::TranscriptionFailed { error, .. } => {
            warn!(error = %error, "Turn skipped: transcription failed")
        }
    }
}
