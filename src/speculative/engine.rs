//! Speculative decoding orchestrator.
//!
//! One generation is one logical task. Each round runs the same sequential
//! pipeline:
//!
//! 1. **Draft**: K tokens from the local draft model, under its lock.
//! 2. **Verify**: one batched K+1-position request to the remote target.
//! 3. **Compare**: rejection sampling over the aligned distributions.
//! 4. **Commit**: append produced ids, re-decode the full id sequence.
//! 5. **Emit**: events in strict causal order, then rolling metrics.
//!
//! The loop stops on a committed EOS id, on reaching `max_tokens`, or on
//! cancellation; a `done` event is always the last event of a successful
//! stream, `error` of a failed one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::sampler::{Outcome, RejectionSampler, Verdict};
use crate::config::Settings;
use crate::context::ContextState;
use crate::draft::{DraftModel, DraftToken};
use crate::error::{Error, Result};
use crate::events::{Event, EventSink, GenerationRequest, TokenStatus, TopToken};
use crate::metrics::{MetricsTracker, RoundStats};
use crate::target::{PromptFormat, TargetModel, VerificationResult};

/// Backoff before the single retry of a failed verification.
const RETRY_BACKOFF_MS: u64 = 250;

/// Target top tokens carried on each verify event.
const EVENT_TOP_TOKENS: usize = 5;

/// Cooperative cancellation signal, checked at each suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The generation finishes its current phase,
    /// discards the round's unemitted events, and emits `done`.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tokens produced by one round, ready to commit.
struct RoundProduce {
    token_ids: Vec<u32>,
    produced_count: usize,
}

/// The speculative decoding orchestrator.
///
/// Owns no cross-generation state: context, metrics, and round bookkeeping
/// live for a single [`Speculator::run`] call. The draft model is a shared
/// serially-accessed resource (mutable KV cache) and sits behind a
/// single-holder lock; the target client is safely concurrent.
pub struct Speculator<D: DraftModel, T: TargetModel> {
    draft: Arc<Mutex<D>>,
    target: T,
    sampler: RejectionSampler,
    settings: Settings,
    prompt_format: PromptFormat,
}

impl<D: DraftModel, T: TargetModel> Speculator<D, T> {
    pub fn new(draft: Arc<Mutex<D>>, target: T, settings: Settings) -> Self {
        let prompt_format = PromptFormat::for_model(&settings.target_model);
        Self {
            draft,
            target,
            sampler: RejectionSampler::new(),
            settings,
            prompt_format,
        }
    }

    /// Create with a seeded rejection sampler for reproducible runs.
    pub fn with_seed(draft: Arc<Mutex<D>>, target: T, settings: Settings, seed: u64) -> Self {
        Self {
            sampler: RejectionSampler::with_seed(seed),
            ..Self::new(draft, target, settings)
        }
    }

    /// Run one generation to completion, streaming events to `sink`.
    ///
    /// Emits events in strict causal order and terminates the stream with
    /// exactly one `done` (normal completion or cancellation) or one
    /// `error` (fatal failure, also returned).
    pub fn run(
        &mut self,
        request: &GenerationRequest,
        sink: &mut dyn EventSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        if let Err(e) = request.validate() {
            sink.emit(Event::Error {
                message: e.to_string(),
                round: None,
            })?;
            return Err(e);
        }

        let context_ids = match self.apply_chat_template(&request.prompt) {
            Ok(ids) => ids,
            Err(e) => {
                sink.emit(Event::Error {
                    message: e.to_string(),
                    round: None,
                })?;
                return Err(e);
            }
        };
        info!(context_tokens = context_ids.len(), "starting generation");

        let mut state = ContextState::new(&request.prompt, context_ids);
        let mut metrics = MetricsTracker::new(self.settings.metrics_window);

        match self.decode_loop(request, &mut state, &mut metrics, sink, cancel) {
            Ok(()) => {
                info!(
                    tokens = metrics.total_tokens(),
                    rounds = metrics.total_rounds(),
                    "generation complete"
                );
                sink.emit(Event::Done {
                    total_tokens: metrics.total_tokens(),
                    total_rounds: metrics.total_rounds(),
                    final_acceptance_rate: metrics.overall_acceptance_rate(),
                    average_speedup: metrics.speedup(),
                    generated_text: state.generated_text().to_string(),
                })?;
                Ok(())
            }
            Err(e) => {
                warn!(round = state.current_round(), error = %e, "generation failed");
                let round = state.current_round();
                sink.emit(Event::Error {
                    message: e.to_string(),
                    round: (round > 0).then_some(round),
                })?;
                Err(e)
            }
        }
    }

    fn decode_loop(
        &mut self,
        request: &GenerationRequest,
        state: &mut ContextState,
        metrics: &mut MetricsTracker,
        sink: &mut dyn EventSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        while state.total_committed() < request.max_tokens {
            if cancel.is_cancelled() {
                break;
            }
            let round = state.next_round();
            let round_start = Instant::now();

            // --- Draft K tokens locally ---
            let draft_start = Instant::now();
            let drafts = {
                let mut draft = self.lock_draft()?;
                draft.draft(&state.full_token_ids(), request.k, request.temperature)?
            };
            let draft_latency_ms = draft_start.elapsed().as_secs_f64() * 1000.0;
            debug!(
                round,
                drafted = drafts.len(),
                draft_latency_ms,
                "draft phase complete"
            );

            if cancel.is_cancelled() {
                break;
            }
            for dt in &drafts {
                sink.emit(Event::DraftToken {
                    round,
                    position: dt.position,
                    token: dt.token_text.clone(),
                    token_id: dt.token_id,
                    logprob: dt.logprob_sampled,
                    entropy: dt.entropy,
                    top_tokens: dt.top_alternatives.clone(),
                    draft_time_ms: dt.elapsed_ms,
                })?;
            }

            // --- Verify against the remote target ---
            let prompt_text = self
                .prompt_format
                .render(&request.prompt, state.generated_text());
            let verify_start = Instant::now();
            let verification = self.verify_with_retry(&prompt_text, request.k + 1, request.temperature)?;
            // Spans both attempts when a retry happened.
            let verify_latency_ms = verify_start.elapsed().as_secs_f64() * 1000.0;

            if verification.positions.is_empty() || verification.positions.len() > request.k + 1 {
                return Err(Error::InvalidRemote(format!(
                    "expected up to {} positions, got {}",
                    request.k + 1,
                    verification.positions.len()
                )));
            }

            // --- Rejection sampling ---
            let verdict = self.sampler.verify(&drafts, &verification.positions);
            info!(
                round,
                accepted = verdict.accepted_count,
                drafted = drafts.len(),
                "round verdict"
            );

            if cancel.is_cancelled() {
                break;
            }

            // --- Emit per-position results, collect this round's tokens ---
            let produce = self.emit_verify_events(
                round,
                &drafts,
                &verification,
                &verdict,
                verify_latency_ms,
                sink,
            )?;

            // --- Commit: text is always re-decoded from the full ids ---
            let mut combined = state.generated_token_ids().to_vec();
            combined.extend_from_slice(&produce.token_ids);
            let decoded = self.lock_draft()?.decode(&combined)?;
            state.commit(&produce.token_ids, decoded);

            let round_wall_ms = round_start.elapsed().as_secs_f64() * 1000.0;
            metrics.record_round(RoundStats {
                k_drafted: drafts.len(),
                accepted_count: verdict.accepted_count,
                produced_count: produce.produced_count,
                draft_latency_ms,
                verify_latency_ms,
                round_wall_ms,
            });
            sink.emit(Event::Metrics {
                round,
                acceptance_rate: metrics.acceptance_rate(),
                round_accepted: verdict.accepted_count,
                round_total: drafts.len(),
                effective_tps: metrics.effective_tps(),
                baseline_tps: metrics.baseline_tps(),
                speedup: metrics.speedup(),
                draft_latency_ms: metrics.avg_draft_latency_ms(),
                verify_latency_ms: metrics.avg_verify_latency_ms(),
                total_tokens_generated: metrics.total_tokens(),
            })?;

            if state.hit_eos(&self.settings.eos_token_ids) {
                info!(round, "eos committed, stopping");
                break;
            }
        }
        Ok(())
    }

    /// Emit verify-result events in position order and collect the ids to
    /// commit. Skipped-tail positions are surfaced as zero-probability
    /// rejections so the stream shows every drafted position's fate.
    fn emit_verify_events(
        &mut self,
        round: usize,
        drafts: &[DraftToken],
        verification: &VerificationResult,
        verdict: &Verdict,
        verify_latency_ms: f64,
        sink: &mut dyn EventSink,
    ) -> Result<RoundProduce> {
        let mut token_ids = Vec::new();
        let mut produced_count = 0usize;

        for (i, dt) in drafts.iter().enumerate() {
            let outcome = &verdict.outcomes[i];
            let position = verification.positions.get(i);
            let target_entropy = position.map(|p| p.entropy);
            let target_top = position
                .map(|p| {
                    p.top_alternatives
                        .iter()
                        .take(EVENT_TOP_TOKENS)
                        .cloned()
                        .collect::<Vec<TopToken>>()
                })
                .unwrap_or_default();

            match outcome.outcome {
                Outcome::Accepted => {
                    token_ids.push(dt.token_id);
                    produced_count += 1;
                    sink.emit(Event::VerifyResult {
                        round,
                        position: i,
                        token: dt.token_text.clone(),
                        token_id: dt.token_id,
                        status: TokenStatus::Accepted,
                        draft_logprob: dt.logprob_sampled,
                        target_logprob: outcome.target_logprob,
                        acceptance_prob: Some(outcome.acceptance_prob),
                        target_entropy,
                        target_top_tokens: target_top,
                        verify_time_ms: verify_latency_ms,
                    })?;
                }
                Outcome::Resampled | Outcome::Rejected => {
                    // The rejected draft token, then its replacement.
                    sink.emit(Event::VerifyResult {
                        round,
                        position: i,
                        token: dt.token_text.clone(),
                        token_id: dt.token_id,
                        status: TokenStatus::Rejected,
                        draft_logprob: dt.logprob_sampled,
                        target_logprob: outcome.target_logprob,
                        acceptance_prob: Some(outcome.acceptance_prob),
                        target_entropy,
                        target_top_tokens: target_top.clone(),
                        verify_time_ms: verify_latency_ms,
                    })?;

                    let resample = verdict
                        .resample
                        .as_ref()
                        .ok_or_else(|| Error::LocalInference("verdict missing resample".into()))?;
                    let ids = self.lock_draft()?.tokenize(&resample.token_text)?;
                    if ids.is_empty() {
                        warn!(token = %resample.token_text, "resampled token produced no ids");
                    }
                    sink.emit(Event::VerifyResult {
                        round,
                        position: i,
                        token: resample.token_text.clone(),
                        token_id: ids.first().copied().unwrap_or(0),
                        status: TokenStatus::Resampled,
                        draft_logprob: dt.logprob_sampled,
                        target_logprob: resample.target_logprob,
                        acceptance_prob: Some(0.0),
                        target_entropy,
                        target_top_tokens: target_top,
                        verify_time_ms: verify_latency_ms,
                    })?;
                    token_ids.extend_from_slice(&ids);
                    produced_count += 1;
                }
                Outcome::Skipped => {
                    sink.emit(Event::VerifyResult {
                        round,
                        position: i,
                        token: dt.token_text.clone(),
                        token_id: dt.token_id,
                        status: TokenStatus::Rejected,
                        draft_logprob: dt.logprob_sampled,
                        target_logprob: None,
                        acceptance_prob: Some(0.0),
                        target_entropy,
                        target_top_tokens: target_top,
                        verify_time_ms: verify_latency_ms,
                    })?;
                }
            }
        }

        // Bonus: the K+1-th target position when every draft was accepted.
        if verdict.accepted_count == drafts.len() {
            if let Some(bonus) = verification.positions.get(drafts.len()) {
                let ids = self.lock_draft()?.tokenize(&bonus.token_text)?;
                if ids.is_empty() {
                    warn!(token = %bonus.token_text, "bonus token produced no ids");
                }
                sink.emit(Event::VerifyResult {
                    round,
                    position: drafts.len(),
                    token: bonus.token_text.clone(),
                    token_id: ids.first().copied().unwrap_or(0),
                    status: TokenStatus::Bonus,
                    draft_logprob: 0.0,
                    target_logprob: Some(bonus.token_logprob),
                    acceptance_prob: Some(1.0),
                    target_entropy: Some(bonus.entropy),
                    target_top_tokens: bonus
                        .top_alternatives
                        .iter()
                        .take(EVENT_TOP_TOKENS)
                        .cloned()
                        .collect(),
                    verify_time_ms: verify_latency_ms,
                })?;
                token_ids.extend_from_slice(&ids);
                produced_count += 1;
            }
        }

        Ok(RoundProduce {
            token_ids,
            produced_count,
        })
    }

    /// One verification attempt plus a single retry with backoff for
    /// retriable failures; the second failure is fatal.
    fn verify_with_retry(
        &mut self,
        prompt_text: &str,
        k_plus_one: usize,
        temperature: f32,
    ) -> Result<VerificationResult> {
        match self.target.verify(prompt_text, k_plus_one, temperature) {
            Ok(v) => Ok(v),
            Err(e) if e.is_retriable() => {
                warn!(error = %e, "verification failed, retrying once");
                std::thread::sleep(Duration::from_millis(RETRY_BACKOFF_MS));
                self.target.verify(prompt_text, k_plus_one, temperature)
            }
            Err(e) => Err(e),
        }
    }

    fn apply_chat_template(&self, prompt: &str) -> Result<Vec<u32>> {
        let (_, ids) = self.lock_draft()?.prompt_ids(prompt)?;
        Ok(ids)
    }

    fn lock_draft(&self) -> Result<MutexGuard<'_, D>> {
        self.draft
            .lock()
            .map_err(|_| Error::LocalInference("draft model lock poisoned".to_string()))
    }

    /// Get reference to the target model.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Get the prompt format selected for the configured target model.
    pub fn prompt_format(&self) -> PromptFormat {
        self.prompt_format
    }
}
