//! # Parla Voice - turn-taking voice assistant loop
//!
//! Listens on a microphone, decides when the user has finished speaking, and
//! answers out loud: transcribe, generate a reply, strip what should not be
//! read aloud, synthesize. Every stage sits behind a small trait so backends
//! can be swapped (or stubbed in tests).
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       Voice Assistant                          │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────────────────┐     │
//! │  │  Audio In  │→ │    VAD     │→ │ Endpointer (~1s gap) │     │
//! │  │   (cpal)   │  │ (webrtc)   │  └──────────┬───────────┘     │
//! │  └────────────┘  └────────────┘             ↓ utterance       │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌─────────┐  │
//! │  │ Transcribe │→ │  Respond   │→ │  Sanitize  │→ │  Speak  │  │
//! │  │ (HTTP/whis)│  │  (Ollama)  │  │  (regex)   │  │ (rodio) │  │
//! │  └────────────┘  └────────────┘  └────────────┘  └─────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod handoff;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod profile;
pub mod stt;
pub mod tts;
pub mod turn;
pub mod vad;

pub use audio::{AudioConfig, AudioFrame, AudioSource, CpalSource};
pub use config::{RunMode, VoiceConfig};
pub use engine::{FrameGate, TurnEngine};
pub use error::{VoiceError, VoiceResult};
pub use filter::{SpeechFilter, TextSanitizer};
pub use handoff::UtteranceSlot;
pub use llm::{EchoGenerator, OllamaGenerator, ResponseGenerator};
pub use orchestrator::{
    run_concurrent, AssistantConfig, CaptureProviders, Providers, StopSignal, VoiceAssistant,
};
pub use pipeline::{TurnPipeline, TurnResult};
pub use profile::{LanguageProfile, MessageKind, ProfileMessages, ProfileRegistry};
pub use stt::{HttpTranscriber, PlaceholderTranscriber, Transcriber};
#[cfg(feature = "whisper")]
pub use stt::WhisperTranscriber;
pub use tts::{HttpTts, LogSynthesizer, PlaybackSynthesizer, SpeechSynthesizer, TtsBackend};
pub use turn::{EngineState, Endpointer, TurnConfig, Utterance};
pub use vad::{EnergyDetector, VadConfig, VoiceActivityDetector, WebRtcDetector};
