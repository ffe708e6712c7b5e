//! Shared value types: roles, messages, generation configuration, token
//! events.

use serde::{Deserialize, Serialize};

use crate::engine::Token;

/// Speaker of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Behavioral instructions; at most one per history, always first.
    System,
    /// End-user turns.
    User,
    /// Model turns.
    Assistant,
}

impl Role {
    /// Role name as it appears in chat markup.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation. Immutable once appended; ordering is
/// conversation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who spoke.
    pub role: Role,
    /// Verbatim message text. Renderers pass this through byte-exact.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Sampling and stopping parameters for one generation call.
///
/// Value object: sessions hold a default and accept a per-call override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Upper bound on generated tokens per call.
    pub max_tokens: usize,
    /// Temperature rescaling, applied after all truncation stages.
    pub temperature: f32,
    /// Top-k truncation; disabled when `<= 0`.
    pub top_k: i32,
    /// Nucleus truncation; disabled when `>= 1.0`.
    pub top_p: f32,
    /// Min-p truncation; disabled when `<= 0.0`.
    pub min_p: f32,
    /// Seed for the final categorical draw. Part of the reproducibility
    /// contract: same seed + same distribution = same token.
    pub seed: u32,
    /// Window of recent tokens the penalty stage inspects; `<= 0` disables
    /// all penalties.
    pub penalty_last_n: i32,
    /// Repeat penalty; `1.0` is neutral.
    pub repeat_penalty: f32,
    /// Frequency penalty; `0.0` is neutral.
    pub frequency_penalty: f32,
    /// Presence penalty; `0.0` is neutral.
    pub presence_penalty: f32,
    /// Stop strings checked against the generated text each step, in
    /// configured order.
    pub stop_strings: Vec<String>,
    /// Cosmetic pause between streamed tokens in the async path,
    /// milliseconds. Pacing only; never affects the generated text.
    pub stream_delay_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            min_p: 0.05,
            seed: 0xFFFF_FFFF,
            penalty_last_n: 64,
            repeat_penalty: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop_strings: Vec::new(),
            stream_delay_ms: 0,
        }
    }
}

/// One generated token, as delivered to streaming consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEvent {
    /// Engine token id.
    pub token: Token,
    /// Text of this token. The token that completes a stop sequence is
    /// never streamed.
    pub text: String,
    /// Zero-based index within the current call.
    pub index: usize,
}
