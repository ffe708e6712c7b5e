//! Scripted in-memory engine for tests.
//!
//! Character-level codec: every char is one token, so tokenize/detokenize
//! round-trip losslessly and token counts are easy to reason about in
//! assertions. The sampler replays a canned completion and then falls to
//! EOS, like a model with nothing left to say.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::engine::{InferenceEngine, Token};
use crate::error::EngineError;
use crate::sampler::SamplerStage;

const BOS: Token = 1;
const EOS: Token = 2;
/// Char tokens start here; everything below is a special token.
const CHAR_BASE: Token = 8;

fn char_tokens(text: &str) -> Vec<Token> {
    text.chars().map(|c| c as Token + CHAR_BASE).collect()
}

pub(crate) struct MockEngine {
    script: Vec<Token>,
    pub template: Option<String>,
    pub batch: usize,
    /// 1-based decode call number that fails, if any.
    pub fail_decode_at: Option<usize>,
    pub decode_calls: usize,
    pub cleared: usize,
    /// Texts tokenized with a BOS marker, i.e. the prompts each call fed
    /// the model.
    pub prompts: RefCell<Vec<String>>,
    /// Stage list of the most recently built sampler.
    pub last_stages: RefCell<Vec<SamplerStage>>,
}

pub(crate) struct MockSampler {
    queue: VecDeque<Token>,
}

impl MockEngine {
    pub fn with_response(text: &str) -> Self {
        Self {
            script: char_tokens(text),
            template: None,
            batch: 4096,
            fail_decode_at: None,
            decode_calls: 0,
            cleared: 0,
            prompts: RefCell::new(Vec::new()),
            last_stages: RefCell::new(Vec::new()),
        }
    }

    pub fn with_template(text: &str, template: &str) -> Self {
        let mut engine = Self::with_response(text);
        engine.template = Some(template.to_string());
        engine
    }
}

impl InferenceEngine for MockEngine {
    type Sampler = MockSampler;

    fn tokenize(
        &self,
        text: &str,
        add_bos: bool,
        _parse_special: bool,
    ) -> Result<Vec<Token>, EngineError> {
        let mut tokens = Vec::with_capacity(text.len() + 1);
        if add_bos {
            tokens.push(BOS);
            self.prompts.borrow_mut().push(text.to_string());
        }
        tokens.extend(char_tokens(text));
        Ok(tokens)
    }

    fn detokenize(&self, tokens: &[Token], _remove_special: bool) -> Result<String, EngineError> {
        // Special tokens carry no text either way.
        Ok(tokens
            .iter()
            .filter(|&&t| t >= CHAR_BASE)
            .filter_map(|&t| char::from_u32((t - CHAR_BASE) as u32))
            .collect())
    }

    fn decode(&mut self, tokens: &[Token]) -> Result<(), EngineError> {
        self.decode_calls += 1;
        if self.fail_decode_at == Some(self.decode_calls) {
            return Err(EngineError::Decode(format!(
                "injected failure on call {} ({} tokens)",
                self.decode_calls,
                tokens.len()
            )));
        }
        Ok(())
    }

    fn make_sampler(&self, stages: &[SamplerStage]) -> MockSampler {
        *self.last_stages.borrow_mut() = stages.to_vec();
        MockSampler { queue: self.script.iter().copied().collect() }
    }

    fn sample(&mut self, sampler: &mut MockSampler, _position: i32) -> Token {
        sampler.queue.pop_front().unwrap_or(EOS)
    }

    fn token_eos(&self) -> Token {
        EOS
    }

    fn chat_template(&self) -> Option<String> {
        self.template.clone()
    }

    fn clear_memory(&mut self) {
        self.cleared += 1;
    }

    fn batch_capacity(&self) -> usize {
        self.batch
    }
}

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
