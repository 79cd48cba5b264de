//! Draft model interface.
//!
//! The draft side proposes K candidate tokens per round under its own
//! distribution q. Everything the rejection sampler and the event stream
//! need — proper log-probabilities, entropy, top alternatives — is
//! captured per position in [`DraftToken`].

pub mod adapter;
pub mod template;

pub use adapter::{DraftBackend, LocalDraftModel};
pub use template::ChatTemplate;

use crate::error::Result;
use crate::events::TopToken;

/// One drafted position.
#[derive(Debug, Clone)]
pub struct DraftToken {
    /// Round-local position, 0-based.
    pub position: usize,
    /// Sampled token id.
    pub token_id: u32,
    /// Sampled token text.
    pub token_text: String,
    /// log q(x | context), after log-softmax normalization.
    pub logprob_sampled: f64,
    /// Shannon entropy of q in nats.
    pub entropy: f64,
    /// Top (token text, logprob) pairs from q.
    pub top_alternatives: Vec<TopToken>,
    /// Wall time spent producing this position.
    pub elapsed_ms: f64,
}

impl DraftToken {
    /// Look up log q for a token text among the recorded alternatives.
    /// The sampled token itself is answered from `logprob_sampled`.
    pub fn logprob_of(&self, token_text: &str) -> Option<f64> {
        if token_text == self.token_text {
            return Some(self.logprob_sampled);
        }
        self.top_alternatives
            .iter()
            .find(|t| t.token == token_text)
            .map(|t| t.logprob)
    }
}

/// A local autoregressive sampler with tokenizer access.
///
/// Implementations own a mutable KV cache, so the orchestrator serializes
/// access behind a single-holder lock.
pub trait DraftModel {
    /// Sample `k` tokens at `temperature` continuing `context_ids`.
    fn draft(&mut self, context_ids: &[u32], k: usize, temperature: f32)
        -> Result<Vec<DraftToken>>;

    /// Decode a full id sequence to text.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Encode text to ids without special tokens. Used to commit
    /// resampled and bonus tokens that arrive from the target as text.
    fn tokenize(&self, text: &str) -> Result<Vec<u32>>;

    /// Apply the chat template to a user prompt, returning the rendered
    /// text and its token ids.
    fn prompt_ids(&self, prompt: &str) -> Result<(String, Vec<u32>)>;
}
