//! The inference-engine boundary.
//!
//! Everything the controller needs from the native side fits in one trait:
//! a deterministic token codec, the stateful decode primitive, sampler
//! construction from [`SamplerStage`] descriptors, and a handful of model
//! queries. Adapter crates implement this for real bindings; tests ship a
//! scripted mock.

use crate::error::EngineError;
use crate::sampler::SamplerStage;

/// Engine token id, matching llama.cpp's 32-bit token space.
pub type Token = i32;

/// Opaque autoregressive inference engine.
///
/// `decode` and `sample` take `&mut self` because they mutate the engine's
/// KV memory in place; combined with the session's exclusive guard this
/// gives a total order over decode calls — the engine is not reentrant.
pub trait InferenceEngine {
    /// Stateful sampler built from a stage list. One instance per
    /// generation call; never reused across calls.
    type Sampler;

    /// Tokenize `text`. `add_bos` prepends the beginning-of-sequence
    /// marker; `parse_special` maps chat markup to special tokens instead
    /// of re-encoding it as plain text.
    fn tokenize(
        &self,
        text: &str,
        add_bos: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>, EngineError>;

    /// Convert tokens back to text. Must round-trip losslessly for
    /// non-special tokens; `remove_special` strips markers like BOS/EOS.
    fn detokenize(&self, tokens: &[Token], remove_special: bool) -> Result<String, EngineError>;

    /// Submit a token batch to the model. Mutates KV memory.
    fn decode(&mut self, tokens: &[Token]) -> Result<(), EngineError>;

    /// Build a sampler from an ordered stage list.
    fn make_sampler(&self, stages: &[SamplerStage]) -> Self::Sampler;

    /// Draw the next token at `position` (`-1` = last decoded logits).
    fn sample(&mut self, sampler: &mut Self::Sampler, position: i32) -> Token;

    /// The end-of-sequence token id.
    fn token_eos(&self) -> Token;

    /// The model's embedded chat template, if any. Queried once per
    /// session to seed dialect detection.
    fn chat_template(&self) -> Option<String>;

    /// Drop all KV memory. Invoked at the start of every independent
    /// generation call.
    fn clear_memory(&mut self);

    /// Decode batch capacity in tokens; the history token budget is this
    /// minus the generation headroom.
    fn batch_capacity(&self) -> usize;
}
