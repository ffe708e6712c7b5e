//! Sampling-stage pipeline construction.
//!
//! The controller describes the chain as ordered [`SamplerStage`] values;
//! the engine interprets them into its own sampler chain. Stage order is
//! fixed because each stage mutates the candidate distribution seen by the
//! next.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::GenerationConfig;

/// One stage of the sampling chain, in application order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SamplerStage {
    /// Repeat/frequency/presence penalties over the last `last_n` tokens.
    Penalties {
        /// Window of recent tokens to inspect.
        last_n: i32,
        /// Repeat penalty (`1.0` = neutral).
        repeat: f32,
        /// Frequency penalty (`0.0` = neutral).
        frequency: f32,
        /// Presence penalty (`0.0` = neutral).
        presence: f32,
    },
    /// Keep only the `k` most likely candidates.
    TopK {
        /// Candidate count.
        k: i32,
    },
    /// Nucleus truncation at cumulative probability `p`.
    TopP {
        /// Cumulative probability bound.
        p: f32,
    },
    /// Drop candidates below `p` times the top probability.
    MinP {
        /// Relative probability floor.
        p: f32,
    },
    /// Temperature rescaling.
    Temperature {
        /// Temperature value.
        t: f32,
    },
    /// Final seeded categorical draw.
    Dist {
        /// RNG seed; same seed + same distribution = same token.
        seed: u32,
    },
}

/// Build the stage list for one generation call.
///
/// Order is penalties, top-k, top-p, min-p, temperature, dist. Disabled
/// stages are omitted entirely; temperature and the final draw are always
/// present.
pub fn build_sampler_stages(config: &GenerationConfig) -> Vec<SamplerStage> {
    let mut stages = Vec::new();

    let use_penalties = config.penalty_last_n > 0
        && (config.repeat_penalty != 1.0
            || config.frequency_penalty > 0.0
            || config.presence_penalty > 0.0);
    if use_penalties {
        debug!(
            last_n = config.penalty_last_n,
            repeat = config.repeat_penalty,
            frequency = config.frequency_penalty,
            presence = config.presence_penalty,
            "penalties enabled"
        );
        stages.push(SamplerStage::Penalties {
            last_n: config.penalty_last_n,
            repeat: config.repeat_penalty,
            frequency: config.frequency_penalty,
            presence: config.presence_penalty,
        });
    }

    if config.top_k > 0 {
        stages.push(SamplerStage::TopK { k: config.top_k });
    }
    if config.top_p < 1.0 {
        stages.push(SamplerStage::TopP { p: config.top_p });
    }
    if config.min_p > 0.0 {
        stages.push(SamplerStage::MinP { p: config.min_p });
    }

    stages.push(SamplerStage::Temperature { t: config.temperature });
    stages.push(SamplerStage::Dist { seed: config.seed });

    stages
}
