//! Language profiles: transcription hint, localized fallback messages and the
//! system prompt for reply generation.
//!
//! Profiles are resolved once at startup and never mutated afterwards. Unknown
//! codes fall back to the default profile (`en`), so resolution cannot fail.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_LANGUAGE: &str = "en";

/// User-facing message kinds every profile must localize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Nothing intelligible was transcribed.
    NotUnderstood,
    /// Reply generation failed.
    ProcessingError,
}

impl MessageKind {
    pub const ALL: [MessageKind; 2] = [MessageKind::NotUnderstood, MessageKind::ProcessingError];

    pub fn key(self) -> &'static str {
        match self {
            MessageKind::NotUnderstood => "not_understood",
            MessageKind::ProcessingError => "processing_error",
        }
    }
}

/// One localized string per `MessageKind`. Missing keys fail deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMessages {
    pub not_understood: String,
    pub processing_error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProfile {
    /// Language code used for lookup and passed to the synthesizer.
    pub code: String,
    /// Language hint for the transcriber.
    pub transcription_language: String,
    pub messages: ProfileMessages,
    pub system_prompt: String,
}

impl LanguageProfile {
    pub fn message(&self, kind: MessageKind) -> &str {
        match kind {
            MessageKind::NotUnderstood => &self.messages.not_understood,
            MessageKind::ProcessingError => &self.messages.processing_error,
        }
    }

    /// Every field must be non-blank and every message kind localized.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.code.trim().is_empty() {
            return Err(VoiceError::Config("language profile has an empty code".to_string()));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(VoiceError::Config(format!(
                "language profile '{}' has an empty system prompt",
                self.code
            )));
        }
        for kind in MessageKind::ALL {
            if self.message(kind).trim().is_empty() {
                return Err(VoiceError::Config(format!(
                    "language profile '{}' has no '{}' message",
                    self.code,
                    kind.key()
                )));
            }
        }
        Ok(())
    }

    fn english() -> Self {
        Self {
            code: "en".to_string(),
            transcription_language: "en".to_string(),
            messages: ProfileMessages {
                not_understood: "I didn't understand. Could you repeat that?".to_string(),
                processing_error: "Sorry, I encountered an error processing your request."
                    .to_string(),
            },
            system_prompt:
                "You are a friendly voice assistant. Keep responses concise and natural."
                    .to_string(),
        }
    }

    fn italian() -> Self {
        Self {
            code: "it".to_string(),
            transcription_language: "it".to_string(),
            messages: ProfileMessages {
                not_understood: "Non ho capito. Potresti ripetere?".to_string(),
                processing_error:
                    "Mi dispiace, ho avuto un problema nell'elaborare la richiesta.".to_string(),
            },
            system_prompt: "Sei un assistente vocale amichevole che parla in italiano. \
                Mantieni le risposte concise e naturali."
                .to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    default: Option<String>,
    #[serde(default, rename = "profile")]
    profiles: Vec<LanguageProfile>,
}

/// Read-only lookup from language code to profile.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, LanguageProfile>,
    default: LanguageProfile,
}

impl ProfileRegistry {
    /// Built-in English and Italian profiles, English default.
    pub fn builtin() -> Self {
        let default = LanguageProfile::english();
        let mut profiles = BTreeMap::new();
        for profile in [default.clone(), LanguageProfile::italian()] {
            profiles.insert(profile.code.clone(), profile);
        }
        Self { profiles, default }
    }

    /// Built-ins plus the profiles in a TOML document. File profiles replace
    /// built-ins with the same code.
    ///
    /// ```toml
    /// default = "en"
    ///
    /// [[profile]]
    /// code = "es"
    /// transcription_language = "es"
    /// system_prompt = "Eres un asistente de voz amable."
    /// [profile.messages]
    /// not_understood = "No he entendido. ¿Puedes repetir?"
    /// processing_error = "Lo siento, ha ocurrido un error."
    /// ```
    pub fn from_toml_str(source: &str) -> VoiceResult<Self> {
        let file: ProfileFile = toml::from_str(source)
            .map_err(|e| VoiceError::Config(format!("invalid profile file: {}", e)))?;

        let mut registry = Self::builtin();
        for profile in file.profiles {
            profile.validate()?;
            registry.profiles.insert(profile.code.clone(), profile);
        }
        let default_code = file.default.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
        registry.default = registry
            .profiles
            .get(&default_code)
            .cloned()
            .ok_or_else(|| {
                VoiceError::Config(format!("default language '{}' has no profile", default_code))
            })?;
        Ok(registry)
    }

    pub fn load_file(path: &Path) -> VoiceResult<Self> {
        let source = std::fs::read_to_string(path)?;
        let registry = Self::from_toml_str(&source)?;
        info!(
            path = %path.display(),
            languages = ?registry.codes(),
            "Loaded language profiles"
        );
        Ok(registry)
    }

    /// Exact lookup; on a miss, log and return the default profile.
    pub fn resolve(&self, code: &str) -> &LanguageProfile {
        if let Some(profile) = self.profiles.get(code) {
            return profile;
        }
        warn!(
            requested = code,
            fallback = %self.default.code,
            "Language not supported, falling back to default"
        );
        self.default_profile()
    }

    pub fn get(&self, code: &str) -> Option<&LanguageProfile> {
        self.profiles.get(code)
    }

    pub fn default_profile(&self) -> &LanguageProfile {
        &self.default
    }

    pub fn codes(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
