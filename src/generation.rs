//! The single-call generation state machine.
//!
//! One `generate` call walks Init (clear memory, tokenize) → PromptEval
//! (one decode batch) → Sampling (sample, decode, stop checks) → Done. The
//! engine's KV memory belongs to this call alone; callers serialize access.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::engine::InferenceEngine;
use crate::error::SessionError;
use crate::models::{GenerationConfig, TokenEvent};
use crate::sampler::build_sampler_stages;
use crate::stop_conditions::match_stop;

/// Why a generation call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    /// The model emitted its end-of-sequence token.
    Eos,
    /// A configured stop sequence appeared and was truncated away.
    Stop,
    /// The `max_tokens` bound was reached.
    MaxTokens,
    /// Cancellation was requested; the output holds whatever was generated
    /// before the request.
    Cancelled,
    /// A mid-generation decode failed; the output is the partial text
    /// produced up to that point.
    Interrupted,
}

/// Output of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    /// Generated text, stop sequence and end-of-sequence marker excluded.
    pub text: String,
    /// Number of generated tokens backing `text`.
    pub tokens_generated: usize,
    /// How the call ended.
    pub finish: FinishReason,
}

/// Cooperative cancellation flag, checked before every sampling step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect before the next token is drawn.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Run one bounded generation pass against `engine`.
///
/// Prompt-evaluation failure is fatal for the call
/// ([`SessionError::PromptEvaluation`]); a decode failure mid-loop ends the
/// call early with partial output instead. Token events are delivered to
/// `stream` best-effort — a gone receiver never disturbs generation.
pub fn generate<E: InferenceEngine>(
    engine: &mut E,
    prompt: &str,
    config: &GenerationConfig,
    stream: Option<&UnboundedSender<TokenEvent>>,
    cancel: &CancelToken,
) -> Result<GenerationOutput, SessionError> {
    // Independent call: drop any KV state a previous call left behind.
    engine.clear_memory();

    let prompt_tokens = engine.tokenize(prompt, true, true)?;
    debug!(prompt_tokens = prompt_tokens.len(), "prompt tokenized");

    if cancel.is_cancelled() {
        return Ok(GenerationOutput {
            text: String::new(),
            tokens_generated: 0,
            finish: FinishReason::Cancelled,
        });
    }

    engine.decode(&prompt_tokens).map_err(SessionError::PromptEvaluation)?;

    let stages = build_sampler_stages(config);
    let mut sampler = engine.make_sampler(&stages);
    let eos = engine.token_eos();

    let mut text = String::new();
    let mut generated = Vec::new();
    let mut finish = FinishReason::MaxTokens;

    for index in 0..config.max_tokens {
        if cancel.is_cancelled() {
            debug!(tokens = generated.len(), "generation cancelled");
            finish = FinishReason::Cancelled;
            break;
        }

        let token = engine.sample(&mut sampler, -1);
        if token == eos {
            finish = FinishReason::Eos;
            break;
        }

        // The sampled token must be decoded before the next sampling step.
        // Failure here is best-effort territory: keep what we have.
        if let Err(e) = engine.decode(&[token]) {
            warn!(token, error = %e, "decode failed mid-generation, returning partial output");
            finish = FinishReason::Interrupted;
            break;
        }
        generated.push(token);

        let piece = match engine.detokenize(&[token], false) {
            Ok(piece) => piece,
            Err(e) => {
                warn!(token, error = %e, "token not representable as text, continuing");
                continue;
            }
        };
        text.push_str(&piece);

        if let Some(stop) = match_stop(&text, &config.stop_strings) {
            debug!(stop = %config.stop_strings[stop.stop_index], "stop sequence matched");
            text.truncate(stop.keep_len);
            // Token boundaries rarely line up with the text cut; re-tokenize
            // the kept text so the reported count matches it.
            if let Ok(clean) = engine.tokenize(&text, false, true) {
                generated = clean;
            }
            finish = FinishReason::Stop;
            break;
        }

        if let Some(tx) = stream {
            // Receiver may be gone; generation must not care.
            let _ = tx.send(TokenEvent { token, text: piece, index });
            if config.stream_delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(config.stream_delay_ms));
            }
        }
    }

    debug!(tokens = generated.len(), ?finish, "generation finished");
    Ok(GenerationOutput { text, tokens_generated: generated.len(), finish })
}
