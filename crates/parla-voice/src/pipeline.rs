//! One conversational turn: transcribe, respond, sanitize, speak.
//!
//! Every stage failure is absorbed here and reported in the returned
//! `TurnResult`; nothing a single turn does can end the loop.

use crate::filter::TextSanitizer;
use crate::llm::ResponseGenerator;
use crate::profile::{LanguageProfile, MessageKind};
use crate::stt::Transcriber;
use crate::tts::SpeechSynthesizer;
use crate::turn::Utterance;
use tracing::{debug, error, info, warn};

/// Outcome of one turn, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnResult {
    /// The generator replied and the sanitized reply was handed to the synthesizer.
    Replied {
        transcript: String,
        reply: String,
        spoken: bool,
        frames: usize,
        samples: usize,
    },
    /// The generator failed; the localized processing-error message was used instead.
    Fallback {
        transcript: String,
        message: String,
        spoken: bool,
        frames: usize,
        samples: usize,
    },
    /// The transcript was empty or whitespace.
    TranscriptionEmpty {
        fallback_spoken: Option<String>,
        frames: usize,
        samples: usize,
    },
    TranscriptionFailed {
        error: String,
        fallback_spoken: Option<String>,
        frames: usize,
        samples: usize,
    },
}

impl TurnResult {
    /// Text handed to the synthesizer and played successfully, if any.
    pub fn spoken_text(&self) -> Option<&str> {
        match self {
            TurnResult::Replied {
                reply, spoken: true, ..
            } => Some(reply),
            TurnResult::Fallback {
                message,
                spoken: true,
                ..
            } => Some(message),
            TurnResult::TranscriptionEmpty {
                fallback_spoken, ..
            }
            | TurnResult::TranscriptionFailed {
                fallback_spoken, ..
            } => fallback_spoken.as_deref(),
            _ => None,
        }
    }

    pub fn frames(&self) -> usize {
        match self {
            TurnResult::Replied { frames, .. }
            | TurnResult::Fallback { frames, .. }
            | TurnResult::TranscriptionEmpty { frames, .. }
            | TurnResult::TranscriptionFailed { frames, .. } => *frames,
        }
    }

    pub fn samples(&self) -> usize {
        match self {
            TurnResult::Replied { samples, .. }
            | TurnResult::Fallback { samples, .. }
            | TurnResult::TranscriptionEmpty { samples, .. }
            | TurnResult::TranscriptionFailed { samples, .. } => *samples,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TurnResult::Replied { .. } => "replied",
            TurnResult::Fallback { .. } => "fallback",
            TurnResult::TranscriptionEmpty { .. } => "transcription_empty",
            TurnResult::TranscriptionFailed { .. } => "transcription_failed",
        }
    }
}

/// Transcriber, generator, sanitizer and synthesizer bound to one language profile.
pub struct TurnPipeline {
    transcriber: Box<dyn Transcriber>,
    generator: Box<dyn ResponseGenerator>,
    sanitizer: Box<dyn TextSanitizer>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    profile: LanguageProfile,
    speak_not_understood: bool,
}

impl TurnPipeline {
    pub fn new(
        transcriber: Box<dyn Transcriber>,
        generator: Box<dyn ResponseGenerator>,
        sanitizer: Box<dyn TextSanitizer>,
        synthesizer: Box<dyn SpeechSynthesizer>,
        profile: LanguageProfile,
    ) -> Self {
        Self {
            transcriber,
            generator,
            sanitizer,
            synthesizer,
            profile,
            speak_not_understood: false,
        }
    }

    /// Speak the profile's not-understood message when a transcript is empty
    /// or transcription fails.
    pub fn with_speak_not_understood(mut self, enabled: bool) -> Self {
        self.speak_not_understood = enabled;
        self
    }

    pub fn profile(&self) -> &LanguageProfile {
        &self.profile
    }

    /// Run one turn. An empty utterance is ignored.
    pub fn run(&mut self, utterance: &Utterance, sample_rate: u32) -> Option<TurnResult> {
        if utterance.is_empty() {
            return None;
        }
        let frames = utterance.len();
        let samples = utterance.samples();
        let sample_count = samples.len();
        info!(frames, samples = sample_count, "Processing turn");

        let transcript = match self.transcriber.transcribe(&samples, sample_rate) {
            Ok(text) => text,
            Err(e) => {
                warn!(stage = e.stage(), "Transcription failed: {}", e);
                let fallback_spoken = self.say_not_understood();
                return Some(TurnResult::TranscriptionFailed {
                    error: e.to_string(),
                    fallback_spoken,
                    frames,
                    samples: sample_count,
                });
            }
        };

        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            info!("Nothing intelligible transcribed");
            let fallback_spoken = self.say_not_understood();
            return Some(TurnResult::TranscriptionEmpty {
                fallback_spoken,
                frames,
                samples: sample_count,
            });
        }
        info!(transcript = %transcript, "User said");

        match self.generator.respond(&transcript, &self.profile.system_prompt) {
            Ok(reply) => {
                let reply = self.sanitizer.filter(&reply);
                debug!(reply = %reply, "Sanitized reply");
                let spoken = self.speak(&reply);
                Some(TurnResult::Replied {
                    transcript,
                    reply,
                    spoken,
                    frames,
                    samples: sample_count,
                })
            }
            Err(e) => {
                error!(stage = e.stage(), "Reply generation failed: {}", e);
                let message = self
                    .sanitizer
                    .filter(self.profile.message(MessageKind::ProcessingError));
                let spoken = self.speak(&message);
                Some(TurnResult::Fallback {
                    transcript,
                    message,
                    spoken,
                    frames,
                    samples: sample_count,
                })
            }
        }
    }

    /// Speak once; failures are logged and reported as `false`.
    fn speak(&mut self, text: &str) -> bool {
        match self.synthesizer.speak(text, &self.profile.code) {
            Ok(()) => true,
            Err(e) => {
                error!(stage = e.stage(), "Speech synthesis failed: {}", e);
                false
            }
        }
    }

    fn say_not_understood(&mut self) -> Option<String> {
        if !self.speak_not_understood {
            return None;
        }
        let message = self
            .sanitizer
            .filter(self.profile.message(MessageKind::NotUnderstood));
        self.speak(&message).then_some(message)
    }

    /// Release transcriber, generator and synthesizer in that order. Every
    /// release is attempted; failures are logged.
    pub fn release(&mut self) {
        if let Err(e) = self.transcriber.release() {
            warn!("Transcriber release failed: {}", e);
        }
        if let Err(e) = self.generator.release() {
            warn!("Generator release failed: {}", e);
        }
        if let Err(e) = self.synthesizer.release() {
            warn!("Synthesizer release failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFrame;
    use crate::error::{VoiceError, VoiceResult};
    use crate::profile::ProfileRegistry;
    use crate::turn::{Endpointer, TurnConfig};
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct FixedTranscriber(VoiceResult<String>);

    impl Transcriber for FixedTranscriber {
        fn transcribe(&mut self, _samples: &[f32], _rate: u32) -> VoiceResult<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(VoiceError::Transcription(e.to_string())),
            }
        }
    }

    struct FixedGenerator(Option<String>);

    impl ResponseGenerator for FixedGenerator {
        fn respond(&mut self, _text: &str, _prompt: &str) -> VoiceResult<String> {
            self.0
                .clone()
                .ok_or_else(|| VoiceError::Generation("model down".to_string()))
        }
    }

    struct Passthrough;

    impl TextSanitizer for Passthrough {
        fn filter(&self, text: &str) -> String {
            text.to_string()
        }
    }

    struct RecordingSynth {
        spoken: Log,
        fail: bool,
    }

    impl SpeechSynthesizer for RecordingSynth {
        fn speak(&mut self, text: &str, language: &str) -> VoiceResult<()> {
            self.spoken
                .lock()
                .unwrap()
                .push(format!("{}:{}", language, text));
            if self.fail {
                Err(VoiceError::Synthesis("no device".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn utterance(frames: usize) -> Utterance {
        let mut ep = Endpointer::new(TurnConfig {
            silence_threshold: 1,
            preroll_frames: 0,
            max_utterance_frames: Some(frames),
        });
        (0..frames)
            .find_map(|_| ep.push(AudioFrame::new(vec![0.1; 512], 16000), true))
            .unwrap()
    }

    fn pipeline(
        transcript: VoiceResult<String>,
        reply: Option<&str>,
        fail_synth: bool,
        lang: &str,
    ) -> (TurnPipeline, Log) {
        let spoken: Log = Arc::default();
        let profile = ProfileRegistry::builtin().resolve(lang).clone();
        let pipeline = TurnPipeline::new(
            Box::new(FixedTranscriber(transcript)),
            Box::new(FixedGenerator(reply.map(str::to_string))),
            Box::new(Passthrough),
            Box::new(RecordingSynth {
                spoken: spoken.clone(),
                fail: fail_synth,
            }),
            profile,
        );
        (pipeline, spoken)
    }

    #[test]
    fn reply_is_spoken_in_profile_language() {
        let (mut p, spoken) = pipeline(Ok(" ciao ".into()), Some("ciao a te"), false, "it");
        let result = p.run(&utterance(3), 16000).unwrap();
        assert_eq!(
            result,
            TurnResult::Replied {
                transcript: "ciao".into(),
                reply: "ciao a te".into(),
                spoken: true,
                frames: 3,
                samples: 3 * 512,
            }
        );
        assert_eq!(*spoken.lock().unwrap(), vec!["it:ciao a te"]);
    }

    #[test]
    fn generation_failure_speaks_processing_error() {
        let (mut p, spoken) = pipeline(Ok("hello".into()), None, false, "en");
        let result = p.run(&utterance(2), 16000).unwrap();
        assert_eq!(result.kind(), "fallback");
        assert_eq!(
            *spoken.lock().unwrap(),
            vec!["en:Sorry, I encountered an error processing your request."]
        );
    }

    #[test]
    fn empty_transcript_skips_generation_and_speech() {
        let (mut p, spoken) = pipeline(Ok("   ".into()), Some("unused"), false, "en");
        let result = p.run(&utterance(2), 16000).unwrap();
        assert!(matches!(
            result,
            TurnResult::TranscriptionEmpty {
                fallback_spoken: None,
                ..
            }
        ));
        assert!(spoken.lock().unwrap().is_empty());
    }

    #[test]
    fn transcription_error_can_speak_not_understood() {
        let (p, spoken) = pipeline(
            Err(VoiceError::Transcription("timeout".into())),
            Some("unused"),
            false,
            "it",
        );
        let mut p = p.with_speak_not_understood(true);
        let result = p.run(&utterance(1), 16000).unwrap();
        assert_eq!(result.spoken_text(), Some("Non ho capito. Potresti ripetere?"));
        assert_eq!(spoken.lock().unwrap().len(), 1);
    }

    #[test]
    fn synthesis_failure_is_absorbed() {
        let (mut p, spoken) = pipeline(Ok("hi".into()), Some("hello"), true, "en");
        let result = p.run(&utterance(1), 16000).unwrap();
        assert!(matches!(result, TurnResult::Replied { spoken: false, .. }));
        assert_eq!(result.spoken_text(), None);
        // No retry.
        assert_eq!(spoken.lock().unwrap().len(), 1);
    }

    #[test]
    fn empty_utterance_is_ignored() {
        let (mut p, spoken) = pipeline(Ok("hi".into()), Some("hello"), false, "en");
        assert!(p.run(&Utterance::default(), 16000).is_none());
        assert!(spoken.lock().unwrap().is_empty());
    }
}
