//! Rolling performance metrics for the speculation loop.

use std::collections::VecDeque;

use crate::config::DEFAULT_METRICS_WINDOW;

/// Summary of one completed round.
#[derive(Debug, Clone, Copy)]
pub struct RoundStats {
    /// Number of tokens drafted this round (K).
    pub k_drafted: usize,
    /// Draft tokens accepted by rejection sampling.
    pub accepted_count: usize,
    /// Tokens committed this round: accepted plus resample or bonus.
    pub produced_count: usize,
    /// Wall time of the draft phase.
    pub draft_latency_ms: f64,
    /// Wall time of the verify phase (including any retry).
    pub verify_latency_ms: f64,
    /// Wall time of the whole round.
    pub round_wall_ms: f64,
}

/// Fixed-capacity ring of recent round summaries with derived rolling
/// metrics. Lifetime totals are kept separately for the final report.
#[derive(Debug)]
pub struct MetricsTracker {
    window: VecDeque<RoundStats>,
    window_size: usize,
    total_tokens: usize,
    total_accepted: usize,
    total_drafted: usize,
    total_rounds: usize,
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS_WINDOW)
    }
}

impl MetricsTracker {
    /// Create a tracker holding the last `window_size` rounds.
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            total_tokens: 0,
            total_accepted: 0,
            total_drafted: 0,
            total_rounds: 0,
        }
    }

    /// Append one round, evicting the oldest when the window is full.
    pub fn record_round(&mut self, stats: RoundStats) {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(stats);
        self.total_tokens += stats.produced_count;
        self.total_accepted += stats.accepted_count;
        self.total_drafted += stats.k_drafted;
        self.total_rounds += 1;
    }

    /// Rounds currently held in the window.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Lifetime committed token count.
    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    /// Lifetime round count.
    pub fn total_rounds(&self) -> usize {
        self.total_rounds
    }

    /// Windowed acceptance rate: accepted / drafted over the window.
    pub fn acceptance_rate(&self) -> f64 {
        let drafted: usize = self.window.iter().map(|r| r.k_drafted).sum();
        let accepted: usize = self.window.iter().map(|r| r.accepted_count).sum();
        ratio(accepted as f64, drafted as f64)
    }

    /// Lifetime acceptance rate.
    pub fn overall_acceptance_rate(&self) -> f64 {
        ratio(self.total_accepted as f64, self.total_drafted as f64)
    }

    /// Committed tokens per second over the window.
    pub fn effective_tps(&self) -> f64 {
        let produced: usize = self.window.iter().map(|r| r.produced_count).sum();
        let wall_s: f64 = self.window.iter().map(|r| r.round_wall_ms).sum::<f64>() / 1000.0;
        ratio(produced as f64, wall_s)
    }

    /// Estimated tokens/sec of pure autoregressive calls to the same
    /// target: one verify-sized round trip per token.
    pub fn baseline_tps(&self) -> f64 {
        let mean_verify = self.avg_verify_latency_ms();
        ratio(1000.0, mean_verify)
    }

    /// Effective throughput over the autoregressive baseline.
    pub fn speedup(&self) -> f64 {
        ratio(self.effective_tps(), self.baseline_tps())
    }

    /// Mean draft latency over the window.
    pub fn avg_draft_latency_ms(&self) -> f64 {
        let sum: f64 = self.window.iter().map(|r| r.draft_latency_ms).sum();
        ratio(sum, self.window.len() as f64)
    }

    /// Mean verify latency over the window.
    pub fn avg_verify_latency_ms(&self) -> f64 {
        let sum: f64 = self.window.iter().map(|r| r.verify_latency_ms).sum();
        ratio(sum, self.window.len() as f64)
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
