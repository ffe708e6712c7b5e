//! Error taxonomy for sessions and the engine boundary.

use thiserror::Error;

/// Failures raised by the external inference engine collaborator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Text could not be tokenized.
    #[error("tokenization failed: {0}")]
    Tokenize(String),

    /// Tokens could not be converted back to text.
    #[error("detokenization failed: {0}")]
    Detokenize(String),

    /// A batch decode call failed.
    #[error("batch decode failed: {0}")]
    Decode(String),
}

/// Errors surfaced by [`ChatSession`](crate::session::ChatSession) and the
/// generation machinery.
///
/// Mid-generation token-evaluation failures are intentionally absent: they
/// end the call with partial output
/// ([`FinishReason::Interrupted`](crate::generation::FinishReason)) instead
/// of failing it.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The model file could not be loaded. Raised by engine constructors;
    /// fatal, never retried.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// The engine context could not be created. Raised by engine
    /// constructors; fatal.
    #[error("failed to create context: {0}")]
    ContextCreation(String),

    /// The prompt batch failed to decode. Fatal for the call; the session
    /// remains usable once memory is cleared on the next call.
    #[error("prompt evaluation failed: {0}")]
    PromptEvaluation(#[source] EngineError),

    /// Generation was cancelled before completing. A distinct outcome, not
    /// a machinery failure.
    #[error("generation cancelled")]
    Cancelled,

    /// The session was closed; the call had no side effects.
    #[error("session is closed")]
    SessionDead,

    /// The background generation task died in the async variant.
    #[error("background generation task failed: {0}")]
    Task(String),

    /// Any other collaborator failure.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
