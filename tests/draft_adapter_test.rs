//! Integration tests for the local draft adapter over a scripted backend.

use candle_core::{Device, Tensor};
use specstream::{ChatTemplate, DraftBackend, DraftModel, LocalDraftModel};
use tokenizers::Tokenizer;

const VOCAB: usize = 6;

/// Tiny word-level tokenizer: ids 1..=5 map to "a".."e".
fn test_tokenizer() -> Tokenizer {
    let json = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"<unk>": 0, "a": 1, "b": 2, "c": 3, "d": 4, "e": 5},
            "unk_token": "<unk>"
        }
    }"#;
    Tokenizer::from_bytes(json.as_bytes()).expect("valid tokenizer json")
}

/// Backend that deterministically prefers `(last_input + 1) % VOCAB` and
/// records every forward call for cache assertions.
struct ScriptedBackend {
    device: Device,
    pub calls: Vec<(Vec<u32>, usize)>,
    pub resets: usize,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self {
            device: Device::Cpu,
            calls: Vec::new(),
            resets: 0,
        }
    }
}

impl DraftBackend for ScriptedBackend {
    fn forward(&mut self, input_ids: &Tensor, start_pos: usize) -> candle_core::Result<Tensor> {
        let ids: Vec<u32> = input_ids.squeeze(0)?.to_vec1()?;
        let last = *ids.last().unwrap_or(&0);
        self.calls.push((ids, start_pos));

        let favored = (last + 1) % VOCAB as u32;
        let mut logits = vec![0.0f32; VOCAB];
        logits[favored as usize] = 5.0;
        Tensor::new(logits.as_slice(), &self.device)
    }

    fn reset_cache(&mut self) {
        self.resets += 1;
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

fn adapter() -> LocalDraftModel<ScriptedBackend> {
    LocalDraftModel::with_seed(ScriptedBackend::new(), test_tokenizer(), ChatTemplate::Raw, 42)
}

#[test]
fn greedy_draft_follows_the_backend_chain() {
    let mut model = adapter();
    let drafts = model.draft(&[1, 2], 3, 0.0).unwrap();

    let ids: Vec<u32> = drafts.iter().map(|d| d.token_id).collect();
    assert_eq!(ids, vec![3, 4, 5]);
    assert_eq!(drafts[0].token_text, "c");
    assert_eq!(drafts[2].token_text, "e");
    for (i, dt) in drafts.iter().enumerate() {
        assert_eq!(dt.position, i);
        assert!(dt.elapsed_ms >= 0.0);
    }
}

#[test]
fn logprobs_are_normalized_and_entropy_nonnegative() {
    let mut model = adapter();
    let drafts = model.draft(&[1], 2, 1.0).unwrap();

    for dt in &drafts {
        assert!(dt.logprob_sampled <= 0.0);
        assert!(dt.entropy >= 0.0);
        // The alternatives cover the whole toy vocabulary; their mass
        // must sum to one.
        let mass: f64 = dt.top_alternatives.iter().map(|t| t.logprob.exp()).sum();
        assert!((mass - 1.0).abs() < 1e-4, "mass {mass} not normalized");
        // Sorted descending.
        for pair in dt.top_alternatives.windows(2) {
            assert!(pair[0].logprob >= pair[1].logprob);
        }
    }
}

#[test]
fn temperature_zero_reports_the_argmax_token() {
    let mut model = adapter();
    let drafts = model.draft(&[2], 1, 0.0).unwrap();
    assert_eq!(drafts[0].token_id, 3);
    // Argmax token carries the highest logprob in the distribution.
    let top = drafts[0]
        .top_alternatives
        .first()
        .expect("alternatives present");
    assert_eq!(top.token, "c");
    assert!((drafts[0].logprob_sampled - top.logprob).abs() < 1e-9);
}

#[test]
fn kv_cache_rolls_across_calls() {
    let mut model = adapter();

    // First call: full context is fed from position 0.
    model.draft(&[1, 2], 2, 0.0).unwrap();
    // Drafted [3, 4]; token 4 was sampled but never fed forward.

    // Second call extends the first context with the committed tokens.
    model.draft(&[1, 2, 3, 4], 2, 0.0).unwrap();

    let backend = model.backend();
    assert_eq!(backend.resets, 1); // Only the initial cold start.
    let calls: Vec<(Vec<u32>, usize)> = backend.calls.clone();
    assert_eq!(calls[0], (vec![1, 2], 0));
    assert_eq!(calls[1], (vec![3], 2));
    // Round 2 resumes from the cached prefix [1, 2, 3]: only the one
    // uncached context token is fed.
    assert_eq!(calls[2], (vec![4], 3));
    assert_eq!(calls[3], (vec![5], 4));
}

#[test]
fn diverged_context_resets_the_cache() {
    let mut model = adapter();
    model.draft(&[1, 2], 1, 0.0).unwrap();
    model.draft(&[4, 4], 1, 0.0).unwrap();
    let backend = model.backend();
    assert_eq!(backend.resets, 2);
    assert_eq!(backend.calls[1], (vec![4, 4], 0));
}

#[test]
fn tokenizer_round_trip_through_the_adapter() {
    let model = adapter();
    assert_eq!(model.tokenize("a b").unwrap(), vec![1, 2]);
    assert_eq!(model.decode(&[3, 4]).unwrap(), "c d");

    let (text, ids) = model.prompt_ids("a c").unwrap();
    assert_eq!(text, "a c");
    assert_eq!(ids, vec![1, 3]);
}
