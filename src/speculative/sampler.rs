//! Modified rejection sampling (Leviathan et al., 2023).
//!
//! Per position the draft token x with draft probability q(x) is accepted
//! with probability `min(1, p(x) / q(x))`. On the first rejection a
//! replacement is drawn from the residual distribution
//! `normalize(max(0, p - q))`, which makes the law of the produced token
//! exactly p regardless of q. Everything after the first rejection is
//! discarded.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::draft::DraftToken;
use crate::target::TargetPositionInfo;

/// Probability floor: below this, mass is treated as absent and the
/// acceptance test is forced to reject.
pub const EPSILON_FLOOR: f64 = 1e-6;

/// Penalty applied below the smallest listed logprob when the draft token
/// is missing from the target's top-N.
const ABSENT_DELTA: f64 = std::f64::consts::LN_2;

/// Per-position verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Draft token kept.
    Accepted,
    /// Draft token discarded.
    Rejected,
    /// Draft token discarded and replaced from the residual distribution.
    Resampled,
    /// Position after the first rejection; never reaches state.
    Skipped,
}

/// Verdict detail for one position.
#[derive(Debug, Clone)]
pub struct PositionOutcome {
    pub outcome: Outcome,
    /// `min(1, p/q)` where evaluated; zero on forced or skipped positions.
    pub acceptance_prob: f64,
    /// log p at the draft token, when the target listed it.
    pub target_logprob: Option<f64>,
}

/// The replacement token drawn after a rejection.
#[derive(Debug, Clone)]
pub struct ResampleToken {
    pub token_text: String,
    /// log p of the replacement, when known.
    pub target_logprob: Option<f64>,
}

/// Complete verdict for one round.
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Accepted prefix length, in `[0, K]`.
    pub accepted_count: usize,
    /// Present iff `accepted_count < K`.
    pub resample: Option<ResampleToken>,
    /// One entry per drafted position.
    pub outcomes: Vec<PositionOutcome>,
}

/// Stateful sampler holding the uniform random source.
#[derive(Debug)]
pub struct RejectionSampler {
    rng: StdRng,
}

impl Default for RejectionSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl RejectionSampler {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create with a seeded RNG for reproducibility.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Run the acceptance test over one round of aligned positions.
    ///
    /// `target` may be shorter than `drafts` when the provider truncated;
    /// missing positions are treated as rejections with a replacement
    /// drawn from the draft distribution's complement.
    pub fn verify(&mut self, drafts: &[DraftToken], target: &[TargetPositionInfo]) -> Verdict {
        let k = drafts.len();
        let mut outcomes = Vec::with_capacity(k);
        let mut accepted_count = 0;
        let mut resample = None;

        for (i, draft) in drafts.iter().enumerate() {
            if resample.is_some() {
                outcomes.push(PositionOutcome {
                    outcome: Outcome::Skipped,
                    acceptance_prob: 0.0,
                    target_logprob: None,
                });
                continue;
            }

            let Some(position) = target.get(i) else {
                // Provider returned fewer positions than drafted.
                outcomes.push(PositionOutcome {
                    outcome: Outcome::Resampled,
                    acceptance_prob: 0.0,
                    target_logprob: None,
                });
                resample = Some(self.sample_draft_complement(draft));
                continue;
            };

            let listed = position.logprob_of(&draft.token_text);
            let log_p = listed.unwrap_or_else(|| absent_floor(position));
            let log_q = draft.logprob_sampled;

            let (accepted, acceptance_prob) = self.acceptance_test(log_p, log_q);
            if accepted {
                outcomes.push(PositionOutcome {
                    outcome: Outcome::Accepted,
                    acceptance_prob,
                    target_logprob: listed,
                });
                accepted_count += 1;
            } else {
                outcomes.push(PositionOutcome {
                    outcome: Outcome::Resampled,
                    acceptance_prob,
                    target_logprob: listed,
                });
                resample = Some(self.sample_residual(draft, position));
            }
        }

        Verdict {
            accepted_count,
            resample,
            outcomes,
        }
    }

    /// Accept iff `u < min(1, p/q)`. Certain acceptance (`p >= q`) skips
    /// the uniform draw; mass at or below the floor forces rejection.
    fn acceptance_test(&mut self, log_p: f64, log_q: f64) -> (bool, f64) {
        let floor = EPSILON_FLOOR.ln();
        if log_p <= floor || log_q <= floor {
            return (false, 0.0);
        }
        if log_p >= log_q {
            return (true, 1.0);
        }
        let ratio = (log_p - log_q).exp();
        let u: f64 = self.rng.gen();
        (u < ratio, ratio)
    }

    /// Draw from `normalize(max(0, p - q))` over the union of both top-N
    /// lists. Tokens absent from a list carry zero probability there, so
    /// the support reduces to the target's list.
    fn sample_residual(
        &mut self,
        draft: &DraftToken,
        position: &TargetPositionInfo,
    ) -> ResampleToken {
        let weights: Vec<f64> = position
            .top_alternatives
            .iter()
            .map(|alt| {
                let p = alt.logprob.exp();
                let q = draft.logprob_of(&alt.token).map_or(0.0, f64::exp);
                (p - q).max(0.0)
            })
            .collect();

        if let Some(index) = self.weighted_choice(&weights) {
            let alt = &position.top_alternatives[index];
            return ResampleToken {
                token_text: alt.token.clone(),
                target_logprob: Some(alt.logprob),
            };
        }

        // Residual vanished under truncation; fall back to p itself.
        let p_weights: Vec<f64> = position
            .top_alternatives
            .iter()
            .map(|alt| alt.logprob.exp())
            .collect();
        if let Some(index) = self.weighted_choice(&p_weights) {
            let alt = &position.top_alternatives[index];
            return ResampleToken {
                token_text: alt.token.clone(),
                target_logprob: Some(alt.logprob),
            };
        }

        ResampleToken {
            token_text: position.token_text.clone(),
            target_logprob: Some(position.token_logprob),
        }
    }

    /// Replacement when no target distribution exists for the position:
    /// the draft's own alternatives minus the drafted token, renormalized.
    fn sample_draft_complement(&mut self, draft: &DraftToken) -> ResampleToken {
        let weights: Vec<f64> = draft
            .top_alternatives
            .iter()
            .map(|alt| {
                if alt.token == draft.token_text {
                    0.0
                } else {
                    alt.logprob.exp()
                }
            })
            .collect();

        if let Some(index) = self.weighted_choice(&weights) {
            let alt = &draft.top_alternatives[index];
            return ResampleToken {
                token_text: alt.token.clone(),
                target_logprob: None,
            };
        }

        ResampleToken {
            token_text: draft.token_text.clone(),
            target_logprob: None,
        }
    }

    /// Sample an index proportionally to `weights`; `None` when the total
    /// mass is zero.
    fn weighted_choice(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return None;
        }
        let mut threshold = self.rng.gen::<f64>() * total;
        for (i, &w) in weights.iter().enumerate() {
            threshold -= w;
            if threshold < 0.0 {
                return Some(i);
            }
        }
        Some(weights.len() - 1)
    }
}

/// Target logprob assigned to a draft token missing from the top-N:
/// `max(log eps, min_listed - ln 2)`. Low enough to reject with high
/// probability, the conservative choice.
fn absent_floor(position: &TargetPositionInfo) -> f64 {
    let floor = EPSILON_FLOOR.ln();
    match position.min_listed_logprob() {
        Some(min_listed) => (min_listed - ABSENT_DELTA).max(floor),
        None => floor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TopToken;

    fn draft(token: &str, logprob: f64, alts: &[(&str, f64)]) -> DraftToken {
        DraftToken {
            position: 0,
            token_id: 1,
            token_text: token.to_string(),
            logprob_sampled: logprob,
            entropy: 0.0,
            top_alternatives: alts
                .iter()
                .map(|(t, lp)| TopToken {
                    token: t.to_string(),
                    logprob: *lp,
                })
                .collect(),
            elapsed_ms: 0.0,
        }
    }

    fn target(token: &str, alts: &[(&str, f64)]) -> TargetPositionInfo {
        TargetPositionInfo {
            token_text: token.to_string(),
            token_id: None,
            token_logprob: alts
                .iter()
                .find(|(t, _)| t == &token)
                .map(|(_, lp)| *lp)
                .unwrap_or(0.0),
            top_alternatives: alts
                .iter()
                .map(|(t, lp)| TopToken {
                    token: t.to_string(),
                    logprob: *lp,
                })
                .collect(),
            entropy: 0.0,
        }
    }

    #[test]
    fn certain_acceptance_when_target_agrees() {
        let mut sampler = RejectionSampler::with_seed(42);
        let drafts = vec![draft("a", -0.5, &[("a", -0.5)])];
        let targets = vec![target("a", &[("a", -0.2)])];
        let verdict = sampler.verify(&drafts, &targets);
        assert_eq!(verdict.accepted_count, 1);
        assert!(verdict.resample.is_none());
        assert_eq!(verdict.outcomes[0].outcome, Outcome::Accepted);
        assert_eq!(verdict.outcomes[0].acceptance_prob, 1.0);
    }

    #[test]
    fn absent_token_forces_rejection() {
        let mut sampler = RejectionSampler::with_seed(42);
        // Target top-N omits the draft token and its floor sits below eps.
        let drafts = vec![draft("x", -0.1, &[("x", -0.1)])];
        let targets = vec![target("y", &[("y", -14.0)])];
        let verdict = sampler.verify(&drafts, &targets);
        assert_eq!(verdict.accepted_count, 0);
        assert_eq!(verdict.outcomes[0].outcome, Outcome::Resampled);
        assert!(verdict.resample.is_some());
        assert_eq!(verdict.outcomes[0].target_logprob, None);
    }

    #[test]
    fn skipped_tail_after_first_rejection() {
        let mut sampler = RejectionSampler::with_seed(42);
        let drafts = vec![
            draft("a", -0.1, &[("a", -0.1)]),
            draft("b", -0.1, &[("b", -0.1)]),
            draft("c", -0.1, &[("c", -0.1)]),
        ];
        // Position 0 accepted, position 1 rejected (draft token absent and
        // the absent-token floor lands at the epsilon floor).
        let targets = vec![
            target("a", &[("a", -0.1)]),
            target("z", &[("z", -13.5)]),
            target("c", &[("c", -0.1)]),
        ];
        let verdict = sampler.verify(&drafts, &targets);
        assert_eq!(verdict.accepted_count, 1);
        assert_eq!(verdict.outcomes[1].outcome, Outcome::Resampled);
        assert_eq!(verdict.outcomes[2].outcome, Outcome::Skipped);
        assert_eq!(verdict.resample.unwrap().token_text, "z");
    }

    #[test]
    fn truncated_target_resamples_from_draft_complement() {
        let mut sampler = RejectionSampler::with_seed(7);
        let drafts = vec![
            draft("a", -0.1, &[("a", -0.1)]),
            draft("b", -0.7, &[("b", -0.7), ("c", -1.0)]),
        ];
        let targets = vec![target("a", &[("a", -0.1)])];
        let verdict = sampler.verify(&drafts, &targets);
        assert_eq!(verdict.accepted_count, 1);
        assert_eq!(verdict.outcomes[1].outcome, Outcome::Resampled);
        // Only "c" remains once the drafted token is excluded.
        assert_eq!(verdict.resample.unwrap().token_text, "c");
    }

    #[test]
    fn seeded_runs_are_identical() {
        let drafts = vec![
            draft("a", -1.2, &[("a", -1.2), ("b", -1.0)]),
            draft("b", -0.9, &[("b", -0.9), ("c", -1.1)]),
        ];
        let targets = vec![
            target("b", &[("b", -0.4), ("a", -2.0)]),
            target("c", &[("c", -0.3), ("b", -2.2)]),
        ];
        let mut s1 = RejectionSampler::with_seed(99);
        let mut s2 = RejectionSampler::with_seed(99);
        let v1 = s1.verify(&drafts, &targets);
        let v2 = s2.verify(&drafts, &targets);
        assert_eq!(v1.accepted_count, v2.accepted_count);
        assert_eq!(
            v1.resample.map(|r| r.token_text),
            v2.resample.map(|r| r.token_text)
        );
    }
}
