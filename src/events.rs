//! Wire schema for the visualization event stream.
//!
//! Events form a discriminated union on the `type` field, emitted in strict
//! causal order per generation: all draft tokens of a round, then its
//! verify results, then its metrics, then the next round; `done` or `error`
//! is always terminal. Field naming on the wire is underscore_case.

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{Error, Result};

/// Outcome of verifying one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    /// Draft token accepted by rejection sampling.
    Accepted,
    /// Draft token rejected.
    Rejected,
    /// Token drawn from the residual distribution after a rejection.
    Resampled,
    /// Free K+1-th token from the target after all drafts were accepted.
    Bonus,
}

/// A (token text, logprob) pair from a truncated distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopToken {
    pub token: String,
    pub logprob: f64,
}

/// Request to start one generation (client → orchestrator).
///
/// Missing fields fall back to the configured defaults via
/// [`StartRequest::resolve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub k: Option<usize>,
}

impl StartRequest {
    /// Fill unset fields from settings, producing a validated request.
    pub fn resolve(self, settings: &Settings) -> Result<GenerationRequest> {
        let request = GenerationRequest {
            prompt: self.prompt,
            max_tokens: self.max_tokens.unwrap_or(settings.max_tokens),
            temperature: self.temperature.unwrap_or(settings.temperature),
            k: self.k.unwrap_or(settings.speculation_k),
        };
        request.validate()?;
        Ok(request)
    }
}

/// A fully resolved generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub k: usize,
}

impl GenerationRequest {
    /// Create a request with explicit parameters.
    pub fn new(prompt: impl Into<String>, k: usize, temperature: f32, max_tokens: usize) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            temperature,
            k,
        }
    }

    /// Check parameter ranges. Fails without side effects.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::Precondition("prompt is empty".to_string()));
        }
        if !(1..=16).contains(&self.k) {
            return Err(Error::Precondition(format!(
                "k must be in [1, 16], got {}",
                self.k
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Precondition(format!(
                "temperature must be in [0, 2], got {}",
                self.temperature
            )));
        }
        if !(1..=4096).contains(&self.max_tokens) {
            return Err(Error::Precondition(format!(
                "max_tokens must be in [1, 4096], got {}",
                self.max_tokens
            )));
        }
        Ok(())
    }
}

/// One event in the generation stream (orchestrator → sink).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A token proposed by the draft model.
    DraftToken {
        round: usize,
        position: usize,
        token: String,
        token_id: u32,
        logprob: f64,
        entropy: f64,
        top_tokens: Vec<TopToken>,
        draft_time_ms: f64,
    },
    /// Verification outcome for one position.
    VerifyResult {
        round: usize,
        position: usize,
        token: String,
        token_id: u32,
        status: TokenStatus,
        draft_logprob: f64,
        target_logprob: Option<f64>,
        acceptance_prob: Option<f64>,
        target_entropy: Option<f64>,
        target_top_tokens: Vec<TopToken>,
        verify_time_ms: f64,
    },
    /// Rolling metrics after a completed round.
    Metrics {
        round: usize,
        acceptance_rate: f64,
        round_accepted: usize,
        round_total: usize,
        effective_tps: f64,
        baseline_tps: f64,
        speedup: f64,
        draft_latency_ms: f64,
        verify_latency_ms: f64,
        total_tokens_generated: usize,
    },
    /// Terminal event on normal completion or cancellation.
    Done {
        total_tokens: usize,
        total_rounds: usize,
        final_acceptance_rate: f64,
        average_speedup: f64,
        generated_text: String,
    },
    /// Terminal event on fatal failure.
    Error {
        message: String,
        round: Option<usize>,
    },
}

impl Event {
    /// The round this event belongs to, if any.
    pub fn round(&self) -> Option<usize> {
        match self {
            Event::DraftToken { round, .. }
            | Event::VerifyResult { round, .. }
            | Event::Metrics { round, .. } => Some(*round),
            Event::Error { round, .. } => *round,
            Event::Done { .. } => None,
        }
    }

    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Done { .. } | Event::Error { .. })
    }
}

/// Consumer of the generation event stream.
///
/// Implementations may block for backpressure; they must preserve order.
pub trait EventSink {
    fn emit(&mut self, event: Event) -> Result<()>;
}

/// Sink that collects events in memory. Used by tests and by transports
/// that frame the whole stream at once.
#[derive(Debug, Default)]
pub struct VecSink {
    pub events: Vec<Event>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for VecSink {
    fn emit(&mut self, event: Event) -> Result<()> {
        self.events.push(event);
        Ok(())
    }
}

/// Decorator that inserts a wall-clock pause after draft and verify events
/// so a front-end can animate them. Ordering is untouched.
pub struct StaggerSink<S> {
    inner: S,
    draft_pause_ms: u64,
    verify_pause_ms: u64,
}

impl<S: EventSink> StaggerSink<S> {
    /// Wrap `inner` with the default 50 ms / 80 ms animation pauses.
    pub fn new(inner: S) -> Self {
        Self::with_pauses(inner, 50, 80)
    }

    pub fn with_pauses(inner: S, draft_pause_ms: u64, verify_pause_ms: u64) -> Self {
        Self {
            inner,
            draft_pause_ms,
            verify_pause_ms,
        }
    }

    /// Unwrap the inner sink.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: EventSink> EventSink for StaggerSink<S> {
    fn emit(&mut self, event: Event) -> Result<()> {
        let pause_ms = match &event {
            Event::DraftToken { .. } => self.draft_pause_ms,
            Event::VerifyResult { .. } => self.verify_pause_ms,
            _ => 0,
        };
        self.inner.emit(event)?;
        if pause_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(pause_ms));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_with_underscore_case() {
        let event = Event::DraftToken {
            round: 1,
            position: 0,
            token: "Hello".to_string(),
            token_id: 10,
            logprob: -0.5,
            entropy: 1.2,
            top_tokens: vec![TopToken {
                token: "Hello".to_string(),
                logprob: -0.5,
            }],
            draft_time_ms: 4.2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "draft_token");
        assert_eq!(json["token_id"], 10);
        assert_eq!(json["top_tokens"][0]["token"], "Hello");
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TokenStatus::Resampled).unwrap(),
            "\"resampled\""
        );
    }

    #[test]
    fn start_request_resolves_defaults() {
        let settings = Settings::new("key", "model");
        let request: StartRequest = serde_json::from_str(r#"{"prompt": "hi", "k": 4}"#).unwrap();
        let resolved = request.resolve(&settings).unwrap();
        assert_eq!(resolved.k, 4);
        assert_eq!(resolved.max_tokens, settings.max_tokens);
    }

    #[test]
    fn validation_rejects_out_of_range() {
        assert!(GenerationRequest::new("p", 0, 0.7, 64).validate().is_err());
        assert!(GenerationRequest::new("p", 17, 0.7, 64).validate().is_err());
        assert!(GenerationRequest::new("p", 4, 2.5, 64).validate().is_err());
        assert!(GenerationRequest::new("p", 4, 0.7, 0).validate().is_err());
        assert!(GenerationRequest::new("  ", 4, 0.7, 64).validate().is_err());
        assert!(GenerationRequest::new("p", 4, 0.0, 1).validate().is_ok());
    }
}
