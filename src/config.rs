//! Configuration types for specstream.
//!
//! All settings are environment-driven (see [`Settings::from_env`]); the
//! orchestrator itself keeps no state across generations.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default speculation depth (tokens drafted per round).
pub const DEFAULT_SPECULATION_K: usize = 8;
/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default generation length cap.
pub const DEFAULT_MAX_TOKENS: usize = 512;
/// Default rolling metrics window (rounds).
pub const DEFAULT_METRICS_WINDOW: usize = 50;
/// Default per-verify timeout in milliseconds.
pub const DEFAULT_VERIFY_TIMEOUT_MS: u64 = 30_000;

/// End-of-sequence token ids covering the supported target families
/// (Llama 3 `<|eot_id|>`/`<|end_of_text|>`, Qwen `<|im_end|>`/`<|endoftext|>`,
/// gpt-oss `<|return|>`).
pub const DEFAULT_EOS_TOKEN_IDS: &[u32] = &[128009, 128001, 151645, 151643, 200002];

/// Process-wide settings, loaded from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// API key for the target model provider.
    pub target_api_key: String,
    /// Remote target model name. Also selects the prompt format strategy.
    pub target_model: String,
    /// Override for the target provider base URL.
    pub target_base_url: Option<String>,
    /// Local draft model identifier.
    pub draft_model: String,
    /// Tokens to draft per round (K).
    pub speculation_k: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
    /// Token ids that terminate generation when committed.
    pub eos_token_ids: HashSet<u32>,
    /// Rolling metrics window size in rounds (W).
    pub metrics_window: usize,
    /// Allowed CORS origins for the transport layer.
    pub cors_origins: Vec<String>,
    /// Per-verify request timeout in milliseconds.
    pub verify_timeout_ms: u64,
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// `TARGET_API_KEY` and `TARGET_MODEL` are required; everything else
    /// falls back to defaults.
    pub fn from_env() -> Result<Self> {
        let target_api_key = require_env("TARGET_API_KEY")?;
        let target_model = require_env("TARGET_MODEL")?;

        Ok(Self {
            target_api_key,
            target_model,
            target_base_url: std::env::var("TARGET_BASE_URL").ok(),
            draft_model: std::env::var("DRAFT_MODEL")
                .unwrap_or_else(|_| "Qwen/Qwen3-0.6B".to_string()),
            speculation_k: parse_env("SPECULATION_K", DEFAULT_SPECULATION_K)?,
            temperature: parse_env("TEMPERATURE", DEFAULT_TEMPERATURE)?,
            max_tokens: parse_env("MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
            eos_token_ids: parse_eos_env("EOS_TOKEN_IDS")?,
            metrics_window: parse_env("METRICS_WINDOW", DEFAULT_METRICS_WINDOW)?,
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            verify_timeout_ms: parse_env("VERIFY_TIMEOUT_MS", DEFAULT_VERIFY_TIMEOUT_MS)?,
        })
    }

    /// Build settings with explicit credentials, defaults elsewhere.
    pub fn new(target_api_key: impl Into<String>, target_model: impl Into<String>) -> Self {
        Self {
            target_api_key: target_api_key.into(),
            target_model: target_model.into(),
            target_base_url: None,
            draft_model: "Qwen/Qwen3-0.6B".to_string(),
            speculation_k: DEFAULT_SPECULATION_K,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            eos_token_ids: DEFAULT_EOS_TOKEN_IDS.iter().copied().collect(),
            metrics_window: DEFAULT_METRICS_WINDOW,
            cors_origins: Vec::new(),
            verify_timeout_ms: DEFAULT_VERIFY_TIMEOUT_MS,
        }
    }

    /// Set the draft model identifier.
    pub fn draft_model(mut self, id: impl Into<String>) -> Self {
        self.draft_model = id.into();
        self
    }

    /// Set the EOS token id set.
    pub fn eos_token_ids(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.eos_token_ids = ids.into_iter().collect();
        self
    }

    /// Set the metrics window size.
    pub fn metrics_window(mut self, window: usize) -> Self {
        self.metrics_window = window;
        self
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("{key} is not set")))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has invalid value {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_eos_env(key: &str) -> Result<HashSet<u32>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<u32>()
                    .map_err(|_| Error::Config(format!("{key} has invalid entry {s:?}")))
            })
            .collect(),
        Err(_) => Ok(DEFAULT_EOS_TOKEN_IDS.iter().copied().collect()),
    }
}
