//! Target model interface.
//!
//! The target is a remote verifier: one completions-style call returns
//! K+1 sampled positions, each with enough of the distribution p (a
//! truncated top-N) to score the draft tokens and support resampling.

pub mod client;
pub mod format;

pub use client::CompletionsClient;
pub use format::PromptFormat;

use crate::error::Result;
use crate::events::TopToken;

/// Verification info for one target position.
#[derive(Debug, Clone)]
pub struct TargetPositionInfo {
    /// The token the target sampled at this position.
    pub token_text: String,
    /// Token id, when the provider exposes ids (completions providers
    /// generally return text only).
    pub token_id: Option<u32>,
    /// log p of the sampled token.
    pub token_logprob: f64,
    /// Top (token, logprob) pairs from p, sorted descending by logprob.
    pub top_alternatives: Vec<TopToken>,
    /// Shannon entropy in nats of the truncated, renormalized p.
    pub entropy: f64,
}

impl TargetPositionInfo {
    /// Look up log p for a token text in the truncated distribution.
    pub fn logprob_of(&self, token_text: &str) -> Option<f64> {
        self.top_alternatives
            .iter()
            .find(|t| t.token == token_text)
            .map(|t| t.logprob)
    }

    /// Smallest listed logprob, if any alternatives were returned.
    pub fn min_listed_logprob(&self) -> Option<f64> {
        self.top_alternatives.last().map(|t| t.logprob)
    }
}

/// Result of one verification call.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// Per-position info; ideally K+1 entries, possibly fewer when the
    /// provider truncates.
    pub positions: Vec<TargetPositionInfo>,
    /// Wall time of the call.
    pub latency_ms: f64,
}

/// A remote verifier for draft tokens.
///
/// Implementations are stateless per call and safe to share across
/// generations.
pub trait TargetModel {
    /// Request `k_plus_one` positions continuing `prompt_text`.
    fn verify(
        &mut self,
        prompt_text: &str,
        k_plus_one: usize,
        temperature: f32,
    ) -> Result<VerificationResult>;
}
