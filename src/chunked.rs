//! Long-form composition across multiple generation windows.
//!
//! Each pass generates one bounded chunk, then the next pass restarts from
//! a compacted context: the system prompt, a connective phrase, and the
//! tail words of the previous chunk. Composition stops early when the
//! model has nothing left to add.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::InferenceEngine;
use crate::error::SessionError;
use crate::generation::{generate, CancelToken, FinishReason};
use crate::models::GenerationConfig;
use crate::session::trim_incomplete_sentence;

/// Connective phrases used to stitch chunks together.
pub const DEFAULT_TRANSITIONS: [&str; 11] = [
    "I would also add,",
    "It is worth noting,",
    "One must also remember that",
    "It bears repeating that",
    "Perhaps unnecessarily,",
    "At the risk of tedium,",
    "Incidentally,",
    "More to the point,",
    "This is compounded by the fact that",
    "Which is to say,",
    "And this is before considering how",
];

/// Picks the connective phrase between chunks. Injectable so tests can
/// substitute a deterministic sequence for true randomness.
pub trait TransitionSelector: Send {
    /// Choose one phrase from `pool`.
    fn pick<'a>(&mut self, pool: &'a [String]) -> &'a str;
}

/// Uniform random selection, the production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTransitions;

impl TransitionSelector for RandomTransitions {
    fn pick<'a>(&mut self, pool: &'a [String]) -> &'a str {
        if pool.is_empty() {
            return "";
        }
        &pool[rand::thread_rng().gen_range(0..pool.len())]
    }
}

/// Progress snapshot for one composition run. Fire-and-forget: delivery
/// never blocks or fails the generation loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeProgress {
    /// 1-based chunk currently being produced (or just produced).
    pub chunk: usize,
    /// Configured chunk count.
    pub total_chunks: usize,
    /// Whole-run percentage.
    pub percent: u32,
    /// Human-readable state.
    pub status: String,
    /// Text of the chunk that just completed, when one did.
    pub latest_chunk: Option<String>,
    /// Set on the final snapshot.
    pub complete: bool,
}

/// Drives repeated generation passes to build output longer than one
/// context window.
pub struct ChunkedComposer<E> {
    engine: Arc<Mutex<E>>,
    system_prompt: String,
    transitions: Vec<String>,
    selector: Box<dyn TransitionSelector>,
    id: String,
}

impl<E> std::fmt::Debug for ChunkedComposer<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedComposer")
            .field("id", &self.id)
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

impl<E: InferenceEngine> ChunkedComposer<E> {
    /// Create a composer over `engine` with the default transition pool
    /// and random selection.
    pub fn new(engine: E, system_prompt: &str) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            system_prompt: system_prompt.to_string(),
            transitions: DEFAULT_TRANSITIONS.iter().map(|s| (*s).to_string()).collect(),
            selector: Box::new(RandomTransitions),
            id: Uuid::new_v4().to_string(),
        }
    }

    /// Swap in a custom transition selector.
    pub fn with_selector(mut self, selector: Box<dyn TransitionSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Replace the transition-phrase pool.
    pub fn set_transitions(&mut self, transitions: Vec<String>) {
        self.transitions = transitions;
    }

    /// Compose up to `chunks` passes from `prompt`. `word_window` is the
    /// number of trailing words carried into the next pass's context —
    /// words, not tokens. `config` falls back to long-form defaults
    /// (shorter passes, stronger anti-repetition) when absent.
    pub fn compose(
        &mut self,
        prompt: &str,
        chunks: usize,
        config: Option<&GenerationConfig>,
        word_window: usize,
    ) -> Result<String, SessionError> {
        let config = config.cloned().unwrap_or_else(long_form_config);
        let mut full = String::new();
        let mut context = format!("{}\n{}", self.system_prompt, prompt);

        for i in 0..chunks {
            debug!(composer = %self.id, chunk = i + 1, total = chunks, "generating chunk");
            let out = {
                let mut engine = self.engine.lock();
                generate(&mut *engine, &context, &config, None, &CancelToken::new())?
            };
            let chunk = trim_incomplete_sentence(&out.text);
            if chunk.trim().is_empty() {
                debug!(composer = %self.id, chunk = i + 1, "empty chunk, stopping early");
                break;
            }

            full.push_str(&chunk);
            full.push(' ');
            context = self.next_context(&chunk, word_window);
        }

        info!(composer = %self.id, chars = full.trim_end().len(), "composition complete");
        Ok(full.trim().to_string())
    }

    /// Async variant of [`Self::compose`] with progress snapshots and
    /// cancellation, checked before every chunk and before every sampled
    /// token within a chunk.
    pub async fn compose_async(
        &mut self,
        prompt: &str,
        chunks: usize,
        config: Option<&GenerationConfig>,
        word_window: usize,
        progress: Option<UnboundedSender<ComposeProgress>>,
        cancel: CancelToken,
    ) -> Result<String, SessionError>
    where
        E: Send + 'static,
    {
        let config = config.cloned().unwrap_or_else(long_form_config);
        let mut full = String::new();
        let mut context = format!("{}\n{}", self.system_prompt, prompt);

        for i in 0..chunks {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            send_progress(
                &progress,
                ComposeProgress {
                    chunk: i + 1,
                    total_chunks: chunks,
                    percent: (i * 100 / chunks) as u32,
                    status: format!("Generating chunk {}/{}...", i + 1, chunks),
                    latest_chunk: None,
                    complete: false,
                },
            );

            let engine = Arc::clone(&self.engine);
            let chunk_config = config.clone();
            let chunk_context = context.clone();
            let chunk_cancel = cancel.clone();
            let out = tokio::task::spawn_blocking(move || {
                let mut engine = engine.lock();
                generate(&mut *engine, &chunk_context, &chunk_config, None, &chunk_cancel)
            })
            .await
            .map_err(|e| SessionError::Task(e.to_string()))??;

            if out.finish == FinishReason::Cancelled {
                return Err(SessionError::Cancelled);
            }

            let chunk = trim_incomplete_sentence(&out.text);
            if chunk.trim().is_empty() {
                break;
            }

            full.push_str(&chunk);
            full.push(' ');

            send_progress(
                &progress,
                ComposeProgress {
                    chunk: i + 1,
                    total_chunks: chunks,
                    percent: ((i + 1) * 100 / chunks) as u32,
                    status: format!("Chunk {} complete", i + 1),
                    latest_chunk: Some(chunk.clone()),
                    complete: false,
                },
            );

            context = self.next_context(&chunk, word_window);
        }

        send_progress(
            &progress,
            ComposeProgress {
                chunk: chunks,
                total_chunks: chunks,
                percent: 100,
                status: "Complete!".to_string(),
                latest_chunk: None,
                complete: true,
            },
        );

        Ok(full.trim().to_string())
    }

    fn next_context(&mut self, chunk: &str, word_window: usize) -> String {
        let tail = last_words(chunk, word_window);
        let transition = self.selector.pick(&self.transitions);
        format!("{}\n{}\n{}", self.system_prompt, transition, tail)
    }
}

fn send_progress(tx: &Option<UnboundedSender<ComposeProgress>>, snapshot: ComposeProgress) {
    if let Some(tx) = tx {
        let _ = tx.send(snapshot);
    }
}

/// Long-form defaults: shorter passes, stronger anti-repetition.
fn long_form_config() -> GenerationConfig {
    GenerationConfig {
        max_tokens: 200,
        temperature: 0.7,
        penalty_last_n: 128,
        repeat_penalty: 1.15,
        frequency_penalty: 0.3,
        ..Default::default()
    }
}

/// The last `count` whitespace-separated words of `text`; the whole text
/// when it has no more than `count` words.
fn last_words(text: &str, count: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= count {
        return text.to_string();
    }
    words[words.len() - count..].join(" ")
}
