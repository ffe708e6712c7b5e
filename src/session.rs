//! Conversational sessions: history, token budget, and turn orchestration.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::InferenceEngine;
use crate::error::SessionError;
use crate::generation::{generate, CancelToken, FinishReason};
use crate::models::{ChatMessage, GenerationConfig, Role, TokenEvent};
use crate::templates::{detect_dialect, render_chat, ChatDialect};

/// A chat session owning its engine exclusively.
///
/// The engine sits behind a mutex so that exactly one generation is in
/// flight per session — the underlying KV memory is mutated in place and
/// is not reentrant. History is only ever mutated by appending a user
/// message, trimming to budget, and appending the assistant reply.
pub struct ChatSession<E> {
    engine: Arc<Mutex<E>>,
    history: Vec<ChatMessage>,
    dialect: ChatDialect,
    base_config: GenerationConfig,
    /// Token budget for rendered history: batch capacity minus generation
    /// headroom.
    max_history_tokens: usize,
    total_tokens_used: usize,
    alive: bool,
    id: String,
}

impl<E> std::fmt::Debug for ChatSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("id", &self.id)
            .field("dialect", &self.dialect)
            .field("messages", &self.history.len())
            .field("alive", &self.alive)
            .finish()
    }
}

impl<E: InferenceEngine> ChatSession<E> {
    /// Create a session over `engine`. The model's chat template is
    /// queried once, here, to pin the markup dialect for the session's
    /// lifetime.
    pub fn new(engine: E, base_config: GenerationConfig, system_prompt: Option<&str>) -> Self {
        let template = engine.chat_template();
        let dialect = detect_dialect(template.as_deref());
        let max_history_tokens =
            engine.batch_capacity().saturating_sub(base_config.max_tokens);
        let id = Uuid::new_v4().to_string();

        info!(
            session = %id,
            ?dialect,
            history_budget = max_history_tokens,
            "chat session created"
        );

        let mut history = Vec::new();
        if let Some(prompt) = system_prompt {
            history.push(ChatMessage::system(prompt));
        }

        Self {
            engine: Arc::new(Mutex::new(engine)),
            history,
            dialect,
            base_config,
            max_history_tokens,
            total_tokens_used: 0,
            alive: true,
            id,
        }
    }

    /// Send a user message and return the assistant reply.
    ///
    /// Appends the user message, trims history to the token budget,
    /// renders the prompt, generates, and appends the post-processed
    /// reply. `overrides` applies to this turn only; see [`Self::set_config`]
    /// for a persistent change.
    pub fn send(
        &mut self,
        text: &str,
        overrides: Option<&GenerationConfig>,
    ) -> Result<String, SessionError> {
        if !self.alive {
            return Err(SessionError::SessionDead);
        }
        let config = overrides.unwrap_or(&self.base_config).clone();

        self.history.push(ChatMessage::user(text));
        let mut engine = self.engine.lock();
        trim_history(&mut self.history, self.max_history_tokens, |s| {
            token_count(&*engine, s)
        });
        let prompt = render_chat(&self.history, self.dialect);

        let out = generate(&mut *engine, &prompt, &config, None, &CancelToken::new())?;
        if out.finish == FinishReason::Cancelled {
            return Err(SessionError::Cancelled);
        }
        let response = trim_incomplete_sentence(&out.text);

        // Advisory bookkeeping only; trimming re-measures from history.
        self.total_tokens_used += token_count(&*engine, text) + token_count(&*engine, &response);
        drop(engine);

        info!(
            session = %self.id,
            tokens = out.tokens_generated,
            finish = ?out.finish,
            "turn complete"
        );
        self.history.push(ChatMessage::assistant(response.clone()));
        Ok(response)
    }

    /// Async variant of [`Self::send`]: runs the decode loop on the
    /// blocking pool, streams token events to `stream`, and honors
    /// `cancel` before every sampled token.
    ///
    /// On cancellation the partial reply is discarded and
    /// [`SessionError::Cancelled`] is returned; the user message stays in
    /// history.
    pub async fn send_async(
        &mut self,
        text: &str,
        overrides: Option<&GenerationConfig>,
        stream: Option<UnboundedSender<TokenEvent>>,
        cancel: CancelToken,
    ) -> Result<String, SessionError>
    where
        E: Send + 'static,
    {
        if !self.alive {
            return Err(SessionError::SessionDead);
        }
        let config = overrides.unwrap_or(&self.base_config).clone();

        self.history.push(ChatMessage::user(text));
        let prompt = {
            let engine = self.engine.lock();
            trim_history(&mut self.history, self.max_history_tokens, |s| {
                token_count(&*engine, s)
            });
            render_chat(&self.history, self.dialect)
        };

        let engine = Arc::clone(&self.engine);
        let out = tokio::task::spawn_blocking(move || {
            let mut engine = engine.lock();
            generate(&mut *engine, &prompt, &config, stream.as_ref(), &cancel)
        })
        .await
        .map_err(|e| SessionError::Task(e.to_string()))??;

        if out.finish == FinishReason::Cancelled {
            info!(session = %self.id, "turn cancelled, partial reply discarded");
            return Err(SessionError::Cancelled);
        }
        let response = trim_incomplete_sentence(&out.text);

        {
            let engine = self.engine.lock();
            self.total_tokens_used +=
                token_count(&*engine, text) + token_count(&*engine, &response);
        }

        info!(
            session = %self.id,
            tokens = out.tokens_generated,
            finish = ?out.finish,
            "turn complete"
        );
        self.history.push(ChatMessage::assistant(response.clone()));
        Ok(response)
    }

    /// Replace the session's default generation config and refresh the
    /// history budget derived from its `max_tokens`.
    pub fn set_config(&mut self, config: GenerationConfig) {
        self.max_history_tokens =
            self.engine.lock().batch_capacity().saturating_sub(config.max_tokens);
        self.base_config = config;
    }

    /// Replace the system message, keeping it first in history.
    pub fn set_system_prompt(&mut self, prompt: &str) {
        self.history.retain(|m| m.role != Role::System);
        self.history.insert(0, ChatMessage::system(prompt));
    }

    /// Append stop strings to the session's default config.
    pub fn add_stop_strings<I>(&mut self, strings: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.base_config.stop_strings.extend(strings.into_iter().map(Into::into));
    }

    /// Close the session: KV memory is dropped immediately and subsequent
    /// sends fail with [`SessionError::SessionDead`]. Idempotent.
    pub fn close(&mut self) {
        if self.alive {
            self.engine.lock().clear_memory();
            info!(session = %self.id, "session closed");
        }
        self.alive = false;
        self.history.clear();
    }

    /// Conversation history, system message first when present.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// The markup dialect pinned at construction.
    pub fn dialect(&self) -> ChatDialect {
        self.dialect
    }

    /// Advisory running total of user/assistant tokens this session.
    pub fn total_tokens_used(&self) -> usize {
        self.total_tokens_used
    }

    /// Whether the session still accepts sends.
    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

fn token_count<E: InferenceEngine>(engine: &E, text: &str) -> usize {
    engine.tokenize(text, false, false).map(|t| t.len()).unwrap_or(0)
}

/// Trim `messages` to fit `budget` estimated tokens.
///
/// The system message is kept unconditionally and charged first. Remaining
/// messages are walked newest to oldest and kept while they fit; the walk
/// stops at the first overflow, so the result is always the system message
/// plus a contiguous suffix in original order.
pub(crate) fn trim_history<F: Fn(&str) -> usize>(
    messages: &mut Vec<ChatMessage>,
    budget: usize,
    estimate: F,
) {
    if messages.len() <= 1 {
        return;
    }

    let system = messages.iter().find(|m| m.role == Role::System).cloned();
    let mut total = system.as_ref().map_or(0, |m| estimate(&m.content));

    let mut kept: Vec<ChatMessage> = Vec::new();
    for msg in messages.iter().rev() {
        if msg.role == Role::System {
            continue;
        }
        let cost = estimate(&msg.content);
        if total + cost > budget {
            break;
        }
        total += cost;
        kept.push(msg.clone());
    }
    kept.reverse();

    let new_len = kept.len() + usize::from(system.is_some());
    if new_len < messages.len() {
        debug!(
            kept = new_len,
            dropped = messages.len() - new_len,
            estimated_tokens = total,
            budget,
            "trimmed history"
        );
    }

    messages.clear();
    messages.extend(system);
    messages.append(&mut kept);
}

/// Drop a trailing sentence fragment: keep up to the last `.`, `!` or `?`.
/// Text without any terminator is returned unmodified so short replies are
/// never emptied.
pub(crate) fn trim_incomplete_sentence(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.ends_with(['.', '!', '?']) {
        return trimmed.to_string();
    }
    match trimmed.rfind(['.', '!', '?']) {
        Some(pos) => trimmed[..=pos].to_string(),
        None => text.to_string(),
    }
}
