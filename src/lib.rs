//! Session-oriented chat controller for llama.cpp-style inference engines.
//!
//! The native engine (model loading, decode, sampling primitives, KV
//! memory) lives behind the [`InferenceEngine`] trait; this crate drives
//! it:
//!
//! - `sampler`: the ordered penalty/truncation/draw stage pipeline
//! - `stop_conditions`: stop-sequence detection over generated text
//! - `generation`: the tokenize → decode → sample loop for one call
//! - `templates`: chat-markup dialect detection and prompt rendering
//! - `session`: conversation history under a hard token budget
//! - `chunked`: long-form output stitched from multiple passes
//!
//! A session owns its engine exclusively; calls into one session are
//! serialized because the engine's KV memory is mutated in place.

pub mod chunked;
pub mod engine;
pub mod error;
pub mod generation;
pub mod models;
pub mod sampler;
pub mod session;
pub mod stop_conditions;
pub mod templates;

#[cfg(test)]
pub(crate) mod testutil;

pub use chunked::{
    ChunkedComposer, ComposeProgress, RandomTransitions, TransitionSelector, DEFAULT_TRANSITIONS,
};
pub use engine::{InferenceEngine, Token};
pub use error::{EngineError, SessionError};
pub use generation::{generate, CancelToken, FinishReason, GenerationOutput};
pub use models::{ChatMessage, GenerationConfig, Role, TokenEvent};
pub use sampler::{build_sampler_stages, SamplerStage};
pub use session::ChatSession;
pub use stop_conditions::{match_stop, StopMatch};
pub use templates::{detect_dialect, render_chat, ChatDialect};
