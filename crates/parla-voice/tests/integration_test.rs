//! Integration tests for the voice loop, driven by scripted stub providers.

use parla_voice::{
    run_concurrent, AssistantConfig, AudioFrame, AudioSource, CaptureProviders, EngineState,
    ProfileRegistry, Providers, ResponseGenerator, SpeechFilter, SpeechSynthesizer, StopSignal,
    Transcriber, TurnConfig, TurnPipeline, VoiceActivityDetector, VoiceAssistant, VoiceError,
    VoiceResult,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RATE: u32 = 16000;
const FRAME: usize = 512;

type Log = Arc<Mutex<Vec<String>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn record(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

// -----------------------------------------------------------------------------
// Stub providers
// -----------------------------------------------------------------------------

/// Plays a speech/silence script. Speech frames carry 0.5, silence 0.0.
/// `None` in the script is a failed read.
struct ScriptedSource {
    script: VecDeque<Option<bool>>,
    /// Raised when the script runs out; otherwise silence is returned forever.
    stop_when_done: Option<StopSignal>,
    fail_start: bool,
    events: Log,
}

impl ScriptedSource {
    fn new(script: Vec<Option<bool>>, events: &Log) -> Self {
        Self {
            script: script.into(),
            stop_when_done: None,
            fail_start: false,
            events: events.clone(),
        }
    }

    fn stopping(mut self, stop: &StopSignal) -> Self {
        self.stop_when_done = Some(stop.clone());
        self
    }
}

impl AudioSource for ScriptedSource {
    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn frame_size(&self) -> usize {
        FRAME
    }

    fn start(&mut self) -> VoiceResult<()> {
        record(&self.events, "audio.start");
        if self.fail_start {
            return Err(VoiceError::Stream("no input device".to_string()));
        }
        Ok(())
    }

    fn read_frame(&mut self) -> VoiceResult<AudioFrame> {
        let next = self.script.pop_front();
        if self.script.is_empty() {
            if let Some(stop) = &self.stop_when_done {
                stop.trigger();
            }
        }
        match next {
            Some(Some(speech)) => {
                let level = if speech { 0.5 } else { 0.0 };
                Ok(AudioFrame::new(vec![level; FRAME], RATE))
            }
            Some(None) => Err(VoiceError::Stream("buffer overflow".to_string())),
            None => {
                std::thread::sleep(Duration::from_millis(1));
                Ok(AudioFrame::silent(FRAME, RATE))
            }
        }
    }

    fn stop(&mut self) -> VoiceResult<()> {
        record(&self.events, "audio.stop");
        Ok(())
    }

    fn release(&mut self) -> VoiceResult<()> {
        record(&self.events, "audio.release");
        Ok(())
    }
}

/// Speech when the frame level is above 0.1.
struct LevelDetector {
    fail: bool,
    events: Log,
}

impl VoiceActivityDetector for LevelDetector {
    fn is_speech(&mut self, frame: &AudioFrame, _sample_rate: u32) -> VoiceResult<bool> {
        if self.fail {
            return Err(VoiceError::Detection("model not loaded".to_string()));
        }
        Ok(frame.rms() > 0.1)
    }

    fn release(&mut self) -> VoiceResult<()> {
        record(&self.events, "vad.release");
        Ok(())
    }
}

/// Pops scripted transcripts (`Err` = failure); "hello" once the script is empty.
struct ScriptedTranscriber {
    results: VecDeque<Result<&'static str, &'static str>>,
    calls: Log,
    events: Log,
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
        record(&self.calls, format!("{}@{}", samples.len(), sample_rate));
        match self.results.pop_front().unwrap_or(Ok("hello")) {
            Ok(text) => Ok(text.to_string()),
            Err(e) => Err(VoiceError::Transcription(e.to_string())),
        }
    }

    fn release(&mut self) -> VoiceResult<()> {
        record(&self.events, "stt.release");
        Ok(())
    }
}

/// Pops scripted replies (`None` = failure); "hi there" once the script is empty.
struct ScriptedGenerator {
    replies: VecDeque<Option<&'static str>>,
    prompts: Log,
    events: Log,
}

impl ResponseGenerator for ScriptedGenerator {
    fn respond(&mut self, text: &str, system_prompt: &str) -> VoiceResult<String> {
        record(&self.prompts, format!("{}|{}", text, system_prompt));
        match self.replies.pop_front().unwrap_or(Some("hi there")) {
            Some(reply) => Ok(reply.to_string()),
            None => Err(VoiceError::Generation("connection refused".to_string())),
        }
    }

    fn release(&mut self) -> VoiceResult<()> {
        record(&self.events, "llm.release");
        // Release failures are logged and never stop the remaining releases.
        Err(VoiceError::Generation("already closed".to_string()))
    }
}

struct RecordingSynth {
    spoken: Log,
    /// 0-based call indices that fail.
    fail_on: Vec<usize>,
    calls: usize,
    stop_after_first: Option<StopSignal>,
    events: Log,
}

impl SpeechSynthesizer for RecordingSynth {
    fn speak(&mut self, text: &str, language: &str) -> VoiceResult<()> {
        let call = self.calls;
        self.calls += 1;
        record(&self.spoken, format!("{}:{}", language, text));
        if let Some(stop) = &self.stop_after_first {
            stop.trigger();
        }
        if self.fail_on.contains(&call) {
            return Err(VoiceError::Synthesis("output device busy".to_string()));
        }
        Ok(())
    }

    fn release(&mut self) -> VoiceResult<()> {
        record(&self.events, "tts.release");
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Harness
// -----------------------------------------------------------------------------

#[derive(Default)]
struct Harness {
    events: Log,
    stt_calls: Log,
    prompts: Log,
    spoken: Log,
    transcripts: Vec<Result<&'static str, &'static str>>,
    replies: Vec<Option<&'static str>>,
    synth_fail_on: Vec<usize>,
    detector_fails: bool,
    language: &'static str,
}

impl Harness {
    fn new() -> Self {
        Self {
            language: "en",
            ..Self::default()
        }
    }

    fn transcriber(&self) -> ScriptedTranscriber {
        ScriptedTranscriber {
            results: self.transcripts.clone().into(),
            calls: self.stt_calls.clone(),
            events: self.events.clone(),
        }
    }

    fn generator(&self) -> ScriptedGenerator {
        ScriptedGenerator {
            replies: self.replies.clone().into(),
            prompts: self.prompts.clone(),
            events: self.events.clone(),
        }
    }

    fn synth(&self, stop_after_first: Option<StopSignal>) -> RecordingSynth {
        RecordingSynth {
            spoken: self.spoken.clone(),
            fail_on: self.synth_fail_on.clone(),
            calls: 0,
            stop_after_first,
            events: self.events.clone(),
        }
    }

    fn assistant(&self, source: ScriptedSource, turn: TurnConfig) -> VoiceAssistant {
        let providers = Providers {
            audio: Box::new(source),
            detector: Box::new(LevelDetector {
                fail: self.detector_fails,
                events: self.events.clone(),
            }),
            transcriber: Box::new(self.transcriber()),
            generator: Box::new(self.generator()),
            sanitizer: Box::new(SpeechFilter::new().unwrap()),
            synthesizer: Box::new(self.synth(None)),
        };
        let profile = ProfileRegistry::builtin().resolve(self.language).clone();
        let config = AssistantConfig {
            turn,
            speak_not_understood: false,
        };
        VoiceAssistant::new(providers, profile, config).unwrap()
    }

    fn spoken(&self) -> Vec<String> {
        entries(&self.spoken)
    }
}

fn script(speech: usize, silence: usize) -> Vec<Option<bool>> {
    let mut frames = vec![Some(true); speech];
    frames.extend(vec![Some(false); silence]);
    frames
}

fn short_turns() -> TurnConfig {
    TurnConfig {
        silence_threshold: 2,
        ..TurnConfig::default()
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[test]
fn one_second_of_silence_ends_the_turn() {
    init_tracing();
    let harness = Harness::new();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(script(40, 35), &harness.events).stopping(&stop);
    let mut assistant = harness.assistant(source, TurnConfig::from_rates(RATE, FRAME));

    assistant.run_until_stopped(&stop).unwrap();

    // Endpoint after frame 71: 40 speech + 32 silence frames.
    assert_eq!(entries(&harness.stt_calls), vec![format!("{}@{}", 72 * 512, RATE)]);
    assert_eq!(72 * 512, 36864);
    assert_eq!(harness.spoken(), vec!["en:hi there"]);
    assert_eq!(assistant.engine().turns(), 1);
    // The trailing 3 silent frames are discarded while listening.
    assert_eq!(assistant.engine().state(), EngineState::Listening);
    assert_eq!(assistant.engine().utterance_len(), 0);
}

#[test]
fn generator_receives_profile_system_prompt() {
    init_tracing();
    let mut harness = Harness::new();
    harness.language = "it";
    let stop = StopSignal::new();
    let source = ScriptedSource::new(script(3, 3), &harness.events).stopping(&stop);
    let mut assistant = harness.assistant(source, short_turns());

    assistant.run_until_stopped(&stop).unwrap();

    let prompts = entries(&harness.prompts);
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("hello|Sei un assistente vocale"));
    assert_eq!(harness.spoken(), vec!["it:hi there"]);
}

#[test]
fn generation_failure_speaks_localized_error() {
    init_tracing();
    let mut harness = Harness::new();
    harness.language = "it";
    harness.replies = vec![None];
    let stop = StopSignal::new();
    let source = ScriptedSource::new(script(5, 3), &harness.events).stopping(&stop);
    let mut assistant = harness.assistant(source, short_turns());

    assistant.run_until_stopped(&stop).unwrap();

    assert_eq!(
        harness.spoken(),
        vec!["it:Mi dispiace, ho avuto un problema nell'elaborare la richiesta."]
    );
}

#[test]
fn loop_resumes_after_every_failure_kind() {
    init_tracing();
    let mut harness = Harness::new();
    harness.transcripts = vec![Err("timeout"), Ok("  "), Ok("one"), Ok("two"), Ok("three")];
    // Turn 3 fails to generate; turn 4's synthesis fails; turn 5 succeeds.
    harness.replies = vec![None, Some("second reply 😀"), Some("third reply")];
    harness.synth_fail_on = vec![1];
    let stop = StopSignal::new();
    let mut frames = Vec::new();
    for _ in 0..5 {
        frames.extend(script(3, 3));
    }
    let source = ScriptedSource::new(frames, &harness.events).stopping(&stop);
    let mut assistant = harness.assistant(source, short_turns());

    assistant.run_until_stopped(&stop).unwrap();

    assert_eq!(assistant.engine().turns(), 5);
    assert_eq!(entries(&harness.stt_calls).len(), 5);
    // Failed and empty transcriptions never reach the generator.
    assert_eq!(entries(&harness.prompts).len(), 3);
    assert_eq!(
        harness.spoken(),
        vec![
            "en:Sorry, I encountered an error processing your request.",
            "en:second reply",
            "en:third reply",
        ]
    );
}

#[test]
fn all_silence_never_reaches_the_pipeline() {
    init_tracing();
    let harness = Harness::new();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(script(0, 500), &harness.events).stopping(&stop);
    let mut assistant = harness.assistant(source, TurnConfig::default());

    assistant.run_until_stopped(&stop).unwrap();

    assert!(entries(&harness.stt_calls).is_empty());
    assert!(harness.spoken().is_empty());
    assert_eq!(assistant.engine().turns(), 0);
}

#[test]
fn detector_errors_are_treated_as_silence() {
    init_tracing();
    let mut harness = Harness::new();
    harness.detector_fails = true;
    let stop = StopSignal::new();
    let source = ScriptedSource::new(script(50, 50), &harness.events).stopping(&stop);
    let mut assistant = harness.assistant(source, short_turns());

    assistant.run_until_stopped(&stop).unwrap();

    assert!(entries(&harness.stt_calls).is_empty());
    assert_eq!(assistant.engine().state(), EngineState::Listening);
}

#[test]
fn read_failures_become_silent_frames() {
    init_tracing();
    let harness = Harness::new();
    let stop = StopSignal::new();
    // The failed read in the middle of the pause counts as silence.
    let frames = vec![
        Some(true),
        Some(true),
        Some(false),
        None,
        Some(false),
        Some(false),
    ];
    let source = ScriptedSource::new(frames, &harness.events).stopping(&stop);
    let mut assistant = harness.assistant(source, short_turns());

    assistant.run_until_stopped(&stop).unwrap();

    assert_eq!(entries(&harness.stt_calls), vec![format!("{}@{}", 5 * 512, RATE)]);
}

#[test]
fn cleanup_releases_in_order_exactly_once() {
    init_tracing();
    let harness = Harness::new();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(script(0, 3), &harness.events).stopping(&stop);
    let mut assistant = harness.assistant(source, TurnConfig::default());

    assistant.run_until_stopped(&stop).unwrap();
    assert!(assistant.is_released());
    assistant.cleanup();
    drop(assistant);

    assert_eq!(
        entries(&harness.events),
        vec![
            "audio.start",
            "audio.stop",
            "audio.release",
            "vad.release",
            "stt.release",
            "llm.release",
            "tts.release",
        ]
    );
}

#[test]
fn start_failure_is_returned_after_cleanup() {
    init_tracing();
    let harness = Harness::new();
    let stop = StopSignal::new();
    let mut source = ScriptedSource::new(script(10, 10), &harness.events);
    source.fail_start = true;
    let mut assistant = harness.assistant(source, TurnConfig::default());

    let err = assistant.run_until_stopped(&stop).unwrap_err();

    assert!(matches!(err, VoiceError::Stream(_)));
    assert!(entries(&harness.stt_calls).is_empty());
    let events = entries(&harness.events);
    assert_eq!(events.first().map(String::as_str), Some("audio.start"));
    assert_eq!(events.last().map(String::as_str), Some("tts.release"));
    assert!(assistant.is_released());
}

#[test]
fn stop_before_run_processes_nothing() {
    init_tracing();
    let harness = Harness::new();
    let stop = StopSignal::new();
    stop.trigger();
    let source = ScriptedSource::new(script(40, 40), &harness.events);
    let mut assistant = harness.assistant(source, TurnConfig::default());

    assistant.run_until_stopped(&stop).unwrap();

    assert!(entries(&harness.stt_calls).is_empty());
    assert!(assistant.is_released());
}

#[test]
fn concurrent_mode_runs_turns_off_the_capture_thread() {
    init_tracing();
    let harness = Harness::new();
    let stop = StopSignal::new();

    let pipeline = TurnPipeline::new(
        Box::new(harness.transcriber()),
        Box::new(harness.generator()),
        Box::new(SpeechFilter::new().unwrap()),
        Box::new(harness.synth(Some(stop.clone()))),
        ProfileRegistry::builtin().resolve("en").clone(),
    );
    let events = harness.events.clone();
    let capture = move || -> VoiceResult<CaptureProviders> {
        Ok(CaptureProviders {
            audio: Box::new(ScriptedSource::new(script(40, 35), &events)),
            detector: Box::new(LevelDetector {
                fail: false,
                events: events.clone(),
            }),
        })
    };

    let turn = TurnConfig::from_rates(RATE, FRAME);
    let turns = run_concurrent(capture, pipeline, turn, &stop).unwrap();

    assert_eq!(turns, 1);
    assert_eq!(entries(&harness.stt_calls), vec![format!("{}@{}", 36864, RATE)]);
    assert_eq!(harness.spoken(), vec!["en:hi there"]);
    assert_eq!(
        entries(&harness.events),
        vec![
            "audio.start",
            "audio.stop",
            "audio.release",
            "vad.release",
            "stt.release",
            "llm.release",
            "tts.release",
        ]
    );
}

#[test]
fn concurrent_startup_failure_is_returned() {
    init_tracing();
    let harness = Harness::new();
    let stop = StopSignal::new();
    let pipeline = TurnPipeline::new(
        Box::new(harness.transcriber()),
        Box::new(harness.generator()),
        Box::new(SpeechFilter::new().unwrap()),
        Box::new(harness.synth(None)),
        ProfileRegistry::builtin().resolve("en").clone(),
    );
    let capture = || -> VoiceResult<CaptureProviders> {
        Err(VoiceError::Stream("no input device".to_string()))
    };

    let err = run_concurrent(capture, pipeline, TurnConfig::default(), &stop).unwrap_err();

    assert!(matches!(err, VoiceError::Stream(_)));
    assert_eq!(
        entries(&harness.events),
        vec!["stt.release", "llm.release", "tts.release"]
    );
}
