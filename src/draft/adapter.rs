//! Local draft model adapter.
//!
//! Bridges a raw-logits runtime (any model exposing the usual
//! `forward(input_ids, start_pos)` signature with an internal KV cache) to
//! the [`DraftModel`] interface. The adapter owns the two numerical
//! obligations of the draft side:
//!
//! - log-softmax normalization before any value is exposed (rejection
//!   sampling is only sound over proper log-probabilities), and
//! - temperature handling: T>0 samples the temperature-scaled softmax and
//!   reports `logprob_sampled` under that distribution; T=0 takes the
//!   argmax and reports values under the unscaled distribution, keeping
//!   the stream informative where the sampling law is degenerate.

use std::time::Instant;

use candle_core::{Device, Tensor, D};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokenizers::Tokenizer;

use super::template::ChatTemplate;
use super::{DraftModel, DraftToken};
use crate::error::{Error, Result};
use crate::events::TopToken;

/// Alternatives recorded per drafted position.
const TOP_ALTERNATIVES: usize = 10;

/// A local autoregressive runtime producing next-token logits.
///
/// `forward` receives only the tokens not yet in the cache, with
/// `start_pos` giving their absolute offset, and returns logits for the
/// last input position (shape `[vocab]` or `[1, vocab]`).
pub trait DraftBackend {
    fn forward(&mut self, input_ids: &Tensor, start_pos: usize) -> candle_core::Result<Tensor>;

    /// Drop all cached attention state.
    fn reset_cache(&mut self);

    fn device(&self) -> &Device;
}

/// [`DraftModel`] implementation over a [`DraftBackend`] plus tokenizer.
pub struct LocalDraftModel<B: DraftBackend> {
    backend: B,
    tokenizer: Tokenizer,
    template: ChatTemplate,
    rng: StdRng,
    /// Tokens already resident in the backend cache.
    cached_ids: Vec<u32>,
}

impl<B: DraftBackend> LocalDraftModel<B> {
    pub fn new(backend: B, tokenizer: Tokenizer, template: ChatTemplate) -> Self {
        Self {
            backend,
            tokenizer,
            template,
            rng: StdRng::from_entropy(),
            cached_ids: Vec::new(),
        }
    }

    /// Create with a seeded RNG for reproducibility.
    pub fn with_seed(backend: B, tokenizer: Tokenizer, template: ChatTemplate, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(backend, tokenizer, template)
        }
    }

    /// Get reference to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Longest cached prefix usable for `context_ids`, resetting the
    /// backend when the cache has diverged or covers the whole context.
    fn reusable_prefix(&mut self, context_ids: &[u32]) -> usize {
        let cached = self.cached_ids.len();
        if cached > 0
            && cached < context_ids.len()
            && context_ids[..cached] == self.cached_ids[..]
        {
            cached
        } else {
            self.backend.reset_cache();
            0
        }
    }

    /// Normalize, then pick a token: argmax at T=0, weighted sample at T>0.
    fn sample_position(&mut self, logits: Tensor, temperature: f32) -> Result<(u32, Vec<f32>)> {
        let logits = if logits.dims().len() > 1 {
            logits.squeeze(0)?
        } else {
            logits
        };

        let scaled = if temperature > 0.0 && temperature != 1.0 {
            (logits / temperature as f64)?
        } else {
            logits
        };
        let logprobs: Vec<f32> = candle_nn::ops::log_softmax(&scaled, D::Minus1)?.to_vec1()?;

        let token_id = if temperature == 0.0 {
            argmax(&logprobs)
        } else {
            let weights: Vec<f64> = logprobs.iter().map(|&lp| (lp as f64).exp()).collect();
            let dist = WeightedIndex::new(&weights)
                .map_err(|e| Error::LocalInference(format!("degenerate draft distribution: {e}")))?;
            dist.sample(&mut self.rng) as u32
        };

        Ok((token_id, logprobs))
    }

    fn token_text(&self, id: u32) -> Result<String> {
        self.tokenizer
            .decode(&[id], false)
            .map_err(|e| Error::Tokenization(e.to_string()))
    }
}

impl<B: DraftBackend> DraftModel for LocalDraftModel<B> {
    fn draft(
        &mut self,
        context_ids: &[u32],
        k: usize,
        temperature: f32,
    ) -> Result<Vec<DraftToken>> {
        if context_ids.is_empty() {
            return Err(Error::LocalInference("empty draft context".to_string()));
        }

        let matched = self.reusable_prefix(context_ids);
        let mut pending: Vec<u32> = context_ids[matched..].to_vec();
        let mut start_pos = matched;
        let mut all_ids: Vec<u32> = context_ids.to_vec();

        let mut drafts = Vec::with_capacity(k);
        for position in 0..k {
            let t0 = Instant::now();
            let input = Tensor::new(pending.as_slice(), self.backend.device())?.unsqueeze(0)?;
            let logits = self.backend.forward(&input, start_pos)?;
            let (token_id, logprobs) = self.sample_position(logits, temperature)?;
            let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;

            let token_text = self.token_text(token_id)?;
            let logprob_sampled = logprobs[token_id as usize] as f64;
            let top_alternatives = self.top_alternatives(&logprobs)?;

            drafts.push(DraftToken {
                position,
                token_id,
                token_text,
                logprob_sampled,
                entropy: entropy_nats(&logprobs),
                top_alternatives,
                elapsed_ms,
            });

            start_pos += pending.len();
            pending = vec![token_id];
            all_ids.push(token_id);
        }

        // The final sampled token was never fed forward.
        all_ids.pop();
        self.cached_ids = all_ids;

        Ok(drafts)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| Error::Tokenization(e.to_string()))
    }

    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| Error::Tokenization(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn prompt_ids(&self, prompt: &str) -> Result<(String, Vec<u32>)> {
        let text = self.template.render(prompt);
        let encoding = self
            .tokenizer
            .encode(text.as_str(), false)
            .map_err(|e| Error::Tokenization(e.to_string()))?;
        Ok((text, encoding.get_ids().to_vec()))
    }
}

impl<B: DraftBackend> LocalDraftModel<B> {
    fn top_alternatives(&self, logprobs: &[f32]) -> Result<Vec<TopToken>> {
        let mut alternatives = Vec::with_capacity(TOP_ALTERNATIVES);
        for id in top_indices(logprobs, TOP_ALTERNATIVES) {
            alternatives.push(TopToken {
                token: self.token_text(id as u32)?,
                logprob: logprobs[id] as f64,
            });
        }
        Ok(alternatives)
    }
}

/// Index of the largest entry.
fn argmax(values: &[f32]) -> u32 {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

/// Shannon entropy in nats of a normalized log-probability vector.
pub fn entropy_nats(logprobs: &[f32]) -> f64 {
    let mut entropy = 0.0f64;
    for &lp in logprobs {
        let p = (lp as f64).exp();
        if p > 0.0 {
            entropy -= p * lp as f64;
        }
    }
    entropy.max(0.0)
}

/// Indices of the `n` largest entries, descending.
fn top_indices(values: &[f32], n: usize) -> Vec<usize> {
    let mut indexed: Vec<(usize, f32)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    indexed.into_iter().take(n).map(|(i, _)| i).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_of_uniform_distribution() {
        let n = 8usize;
        let lp = (1.0f32 / n as f32).ln();
        let logprobs = vec![lp; n];
        let h = entropy_nats(&logprobs);
        assert!((h - (n as f64).ln()).abs() < 1e-5);
    }

    #[test]
    fn entropy_of_point_mass_is_zero() {
        let mut logprobs = vec![f32::NEG_INFINITY; 4];
        logprobs[2] = 0.0;
        assert!(entropy_nats(&logprobs).abs() < 1e-9);
    }

    #[test]
    fn top_indices_sorted_descending() {
        let values = vec![0.1f32, 0.9, 0.5, 0.7];
        assert_eq!(top_indices(&values, 3), vec![1, 3, 2]);
    }

    #[test]
    fn argmax_picks_largest() {
        assert_eq!(argmax(&[0.0, 3.0, 1.0]), 1);
    }
}
