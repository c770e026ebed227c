//! Response generation.
//!
//! `ResponseGenerator` is the reply contract. `OllamaGenerator` talks to a local
//! Ollama server and keeps the conversation history in memory; the system
//! prompt is replaced on every call so the active language profile always wins.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama2";

/// Capability contract for reply generation.
pub trait ResponseGenerator {
    fn respond(&mut self, text: &str, system_prompt: &str) -> VoiceResult<String>;

    /// Drop any conversation state held by the generator.
    fn release(&mut self) -> VoiceResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

/// Ollama `/api/chat` client with in-memory conversation history.
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    history: Vec<ChatMessage>,
    /// Oldest user/assistant pairs are dropped beyond this many messages.
    max_history: usize,
    client: reqwest::blocking::Client,
}

impl OllamaGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Generation(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            model: model.into(),
            history: Vec::new(),
            max_history: 40,
            client,
        })
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// System prompt first, then history, then the new user turn.
    fn build_messages(&self, text: &str, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::new("system", system_prompt));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::new("user", text));
        messages
    }

    fn remember(&mut self, text: &str, reply: &str) {
        self.history.push(ChatMessage::new("user", text));
        self.history.push(ChatMessage::new("assistant", reply));
        while self.history.len() > self.max_history {
            self.history.drain(..2.min(self.history.len()));
        }
    }
}

impl ResponseGenerator for OllamaGenerator {
    fn respond(&mut self, text: &str, system_prompt: &str) -> VoiceResult<String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.model,
            messages: self.build_messages(text, system_prompt),
            stream: false,
        };

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| VoiceError::Generation(format!("Ollama request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Generation(format!(
                "Ollama API error {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = res
            .json()
            .map_err(|e| VoiceError::Generation(format!("Ollama response parse failed: {}", e)))?;

        let reply = parsed
            .message
            .map(|m| m.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| VoiceError::Generation("empty response from model".to_string()))?;

        self.remember(text, &reply);
        debug!(history = self.history.len(), "Reply generated");
        Ok(reply)
    }

    fn release(&mut self) -> VoiceResult<()> {
        self.history.clear();
        Ok(())
    }
}

/// Placeholder generator: repeats the transcript back.
#[derive(Debug, Default)]
pub struct EchoGenerator;

impl ResponseGenerator for EchoGenerator {
    fn respond(&mut self, text: &str, _system_prompt: &str) -> VoiceResult<String> {
        Ok(format!("You said: {}.", text.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> OllamaGenerator {
        OllamaGenerator::new("http://127.0.0.1:9", "test", Duration::from_millis(200)).unwrap()
    }

    #[test]
    fn messages_put_latest_system_prompt_first() {
        let mut gen = generator();
        gen.remember("ciao", "ciao a te");
        let messages = gen.build_messages("come stai?", "Sei un assistente.");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage::new("system", "Sei un assistente."));
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[3], ChatMessage::new("user", "come stai?"));
    }

    #[test]
    fn history_is_bounded_and_cleared_on_release() {
        let mut gen = generator().with_max_history(4);
        for i in 0..5 {
            gen.remember(&format!("q{}", i), &format!("a{}", i));
        }
        assert_eq!(gen.history().len(), 4);
        assert_eq!(gen.history()[0].content, "q3");
        gen.release().unwrap();
        assert!(gen.history().is_empty());
    }

    #[test]
    fn unreachable_server_is_generation_error() {
        let mut gen = generator();
        let err = gen.respond("hello", "prompt").unwrap_err();
        assert!(matches!(err, VoiceError::Generation(_)));
        assert!(gen.history().is_empty());
    }

    #[test]
    fn echo_generator() {
        let mut gen = EchoGenerator;
        assert_eq!(gen.respond(" hi ", "p").unwrap(), "You said: hi.");
    }
}
