//! Completions-endpoint client for the target model.

use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{TargetModel, TargetPositionInfo, VerificationResult};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::events::TopToken;

/// Default provider endpoint.
const DEFAULT_BASE_URL: &str = "https://api.cerebras.ai/v1";

/// Alternatives requested per position. The sampled token is required to
/// be among them.
const TOP_LOGPROBS: usize = 20;

/// Providers refuse logprobs at exactly zero temperature; requests are
/// floored to this value instead.
const MIN_LOGPROB_TEMPERATURE: f32 = 0.01;

/// HTTP client for a completions-style verification endpoint.
#[derive(Debug, Clone)]
pub struct CompletionsClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl CompletionsClient {
    /// Build a client from settings.
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(settings.verify_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: settings
                .target_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: settings.target_api_key.clone(),
            model: settings.target_model.clone(),
        })
    }

    fn request(&self, prompt_text: &str, k_plus_one: usize, temperature: f32) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt_text,
            "max_tokens": k_plus_one,
            "temperature": temperature.max(MIN_LOGPROB_TEMPERATURE),
            "logprobs": TOP_LOGPROBS,
        });

        let response = self
            .http
            .post(format!("{}/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if status.is_server_error() {
            return Err(Error::TransientRemote {
                status: Some(status.as_u16()),
                message: body,
            });
        }
        if !status.is_success() {
            return Err(Error::InvalidRemote(format!(
                "target API error {status}: {body}"
            )));
        }
        Ok(body)
    }
}

impl TargetModel for CompletionsClient {
    fn verify(
        &mut self,
        prompt_text: &str,
        k_plus_one: usize,
        temperature: f32,
    ) -> Result<VerificationResult> {
        let t0 = Instant::now();
        let body = self.request(prompt_text, k_plus_one, temperature)?;
        let latency_ms = t0.elapsed().as_secs_f64() * 1000.0;

        let positions = parse_completion_body(&body)?;
        debug!(
            positions = positions.len(),
            latency_ms, "target verification returned"
        );

        Ok(VerificationResult {
            positions,
            latency_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    logprobs: Option<CompletionLogprobs>,
}

/// OpenAI-style completions logprob layout: parallel arrays per position.
#[derive(Debug, Deserialize)]
struct CompletionLogprobs {
    tokens: Vec<String>,
    token_logprobs: Vec<Option<f64>>,
    #[serde(default)]
    top_logprobs: Vec<Option<std::collections::HashMap<String, f64>>>,
}

/// Parse a completions response body into per-position info.
fn parse_completion_body(body: &str) -> Result<Vec<TargetPositionInfo>> {
    let response: CompletionResponse = serde_json::from_str(body)?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidRemote("response has no choices".to_string()))?;
    let logprobs = choice
        .logprobs
        .ok_or_else(|| Error::InvalidRemote("response has no logprobs".to_string()))?;
    if logprobs.tokens.is_empty() {
        return Err(Error::InvalidRemote("response has no positions".to_string()));
    }

    let mut positions = Vec::with_capacity(logprobs.tokens.len());
    for (i, token_text) in logprobs.tokens.into_iter().enumerate() {
        let token_logprob = logprobs
            .token_logprobs
            .get(i)
            .copied()
            .flatten()
            .unwrap_or(0.0);

        let mut top_alternatives: Vec<TopToken> = logprobs
            .top_logprobs
            .get(i)
            .and_then(|m| m.as_ref())
            .map(|m| {
                m.iter()
                    .map(|(token, &logprob)| TopToken {
                        token: token.clone(),
                        logprob,
                    })
                    .collect()
            })
            .unwrap_or_default();
        top_alternatives
            .sort_by(|a, b| b.logprob.partial_cmp(&a.logprob).unwrap_or(std::cmp::Ordering::Equal));

        let entropy = entropy_from_top_logprobs(&top_alternatives);

        positions.push(TargetPositionInfo {
            token_text,
            token_id: None,
            token_logprob,
            top_alternatives,
            entropy,
        });
    }
    Ok(positions)
}

/// Approximate Shannon entropy from a truncated top-N: renormalize the
/// listed mass to a proper distribution and compute entropy over it.
fn entropy_from_top_logprobs(top: &[TopToken]) -> f64 {
    if top.is_empty() {
        return 0.0;
    }
    let probs: Vec<f64> = top.iter().map(|t| t.logprob.exp()).collect();
    let total: f64 = probs.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mut entropy = 0.0;
    for p in probs {
        let p_norm = p / total;
        if p_norm > 0.0 {
            entropy -= p_norm * p_norm.ln();
        }
    }
    entropy
}
