//! Speech filter: strip text a synthesizer should not read aloud.

use crate::error::{VoiceError, VoiceResult};
use regex::Regex;

/// Capability contract: make text speakable. Pure and infallible.
pub trait TextSanitizer {
    fn filter(&self, text: &str) -> String;
}

/// Patterns removed from replies, applied in order.
const UNSPEAKABLE_PATTERNS: &[&str] = &[
    // Emoji and other astral-plane symbols
    r"[\x{10000}-\x{10FFFF}]",
    // Emoticons: :) :-) ;) =) :-D :p
    r"[:;=]-?[)(/\\|dpDP]",
    // xD X-D
    r"[xX]-?[dD]\b",
    // :o :O
    r":[oO]\b",
    // ^^ ^_^ ^-^
    r"\^[_-]?\^",
    // >< >_< >-<
    r">[_-]?<",
    // o.o O_O
    r"\b[oO][._][oO]\b",
    // *stage directions*
    r"\*[^*]+\*",
    // :shortcodes:
    r":[a-zA-Z_]+:",
    // hearts
    r"</?3",
    // (y) (n)
    r"\([yn]\)",
];

/// Regex-based sanitizer for LLM replies.
#[derive(Debug, Clone)]
pub struct SpeechFilter {
    patterns: Vec<Regex>,
    whitespace: Regex,
}

impl SpeechFilter {
    pub fn new() -> VoiceResult<Self> {
        let patterns = UNSPEAKABLE_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VoiceError::Config(format!("Speech filter pattern failed: {}", e)))?;
        let whitespace = Regex::new(r"\s+")
            .map_err(|e| VoiceError::Config(format!("Speech filter pattern failed: {}", e)))?;
        Ok(Self {
            patterns,
            whitespace,
        })
    }
}

impl TextSanitizer for SpeechFilter {
    fn filter(&self, text: &str) -> String {
        let mut out = text.to_string();
        for pattern in &self.patterns {
            out = pattern.replace_all(&out, " ").into_owned();
        }
        self.whitespace.replace_all(out.trim(), " ").into_owned()
    }
}
