//! Per-generation context tracking.
//!
//! The visible output text is a pure function of the committed id sequence
//! under a single decode call. Tokenizers are not string-homomorphic, so
//! the text is recomputed from the full id sequence on every commit rather
//! than grown by concatenation.

/// Mutable state for a single generation run.
///
/// Created at generation start, mutated only by the speculator at the end
/// of each round, dropped at done/error.
#[derive(Debug, Clone)]
pub struct ContextState {
    /// The user-supplied natural language prompt.
    prompt_text: String,
    /// Tokenized prompt after chat-template application.
    context_token_ids: Vec<u32>,
    /// Tokens committed so far, in order.
    generated_token_ids: Vec<u32>,
    /// Canonical decoding of `generated_token_ids`.
    generated_text: String,
    /// Completed rounds.
    current_round: usize,
    /// Number of committed tokens.
    total_committed: usize,
}

impl ContextState {
    /// Create a fresh context from a prompt and its template-applied ids.
    pub fn new(prompt_text: impl Into<String>, context_token_ids: Vec<u32>) -> Self {
        Self {
            prompt_text: prompt_text.into(),
            context_token_ids,
            generated_token_ids: Vec::new(),
            generated_text: String::new(),
            current_round: 0,
            total_committed: 0,
        }
    }

    /// The user prompt.
    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }

    /// Template-applied prompt token ids.
    pub fn context_token_ids(&self) -> &[u32] {
        &self.context_token_ids
    }

    /// Committed token ids.
    pub fn generated_token_ids(&self) -> &[u32] {
        &self.generated_token_ids
    }

    /// Canonical decoded output text.
    pub fn generated_text(&self) -> &str {
        &self.generated_text
    }

    /// Completed round count (1-based after the first `next_round`).
    pub fn current_round(&self) -> usize {
        self.current_round
    }

    /// Number of committed tokens.
    pub fn total_committed(&self) -> usize {
        self.total_committed
    }

    /// The full draft-model input: prompt ids followed by committed ids.
    pub fn full_token_ids(&self) -> Vec<u32> {
        let mut ids =
            Vec::with_capacity(self.context_token_ids.len() + self.generated_token_ids.len());
        ids.extend_from_slice(&self.context_token_ids);
        ids.extend_from_slice(&self.generated_token_ids);
        ids
    }

    /// Begin a new round.
    pub fn next_round(&mut self) -> usize {
        self.current_round += 1;
        self.current_round
    }

    /// Append this round's produced ids and install the freshly decoded
    /// text. `decoded_text` must be the decoding of the complete committed
    /// id sequence including `ids`.
    pub fn commit(&mut self, ids: &[u32], decoded_text: String) {
        self.generated_token_ids.extend_from_slice(ids);
        self.total_committed = self.generated_token_ids.len();
        self.generated_text = decoded_text;
    }

    /// Whether any committed id is in the EOS set.
    pub fn hit_eos(&self, eos_token_ids: &std::collections::HashSet<u32>) -> bool {
        self.generated_token_ids
            .iter()
            .any(|id| eos_token_ids.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn commit_tracks_counts_and_text() {
        let mut state = ContextState::new("hi", vec![1, 2, 3]);
        assert_eq!(state.total_committed(), 0);

        state.commit(&[10, 11], "ab".to_string());
        assert_eq!(state.total_committed(), 2);
        assert_eq!(state.generated_text(), "ab");
        assert_eq!(state.full_token_ids(), vec![1, 2, 3, 10, 11]);

        state.commit(&[12], "abc".to_string());
        assert_eq!(state.total_committed(), 3);
        assert_eq!(state.generated_token_ids(), &[10, 11, 12]);
    }

    #[test]
    fn eos_detection_scans_committed_ids() {
        let mut state = ContextState::new("hi", vec![1]);
        let eos: HashSet<u32> = [99].into_iter().collect();
        assert!(!state.hit_eos(&eos));
        state.commit(&[5, 99], "x".to_string());
        assert!(state.hit_eos(&eos));
    }
}
