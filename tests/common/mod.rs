//! Deterministic stub models for exercising the speculation loop without
//! a local runtime or network access.

use std::collections::{HashMap, VecDeque};

use specstream::{
    DraftModel, DraftToken, Error, Result, TargetModel, TargetPositionInfo, TopToken,
    VerificationResult,
};

/// Build a draft token with explicit alternatives.
pub fn draft_token(
    position: usize,
    token_id: u32,
    token_text: &str,
    logprob: f64,
    alternatives: &[(&str, f64)],
) -> DraftToken {
    DraftToken {
        position,
        token_id,
        token_text: token_text.to_string(),
        logprob_sampled: logprob,
        entropy: 1.0,
        top_alternatives: alternatives
            .iter()
            .map(|(t, lp)| TopToken {
                token: t.to_string(),
                logprob: *lp,
            })
            .collect(),
        elapsed_ms: 5.0,
    }
}

/// Build a target position from a sorted-or-not alternatives list.
pub fn target_position(token_text: &str, alternatives: &[(&str, f64)]) -> TargetPositionInfo {
    let mut top: Vec<TopToken> = alternatives
        .iter()
        .map(|(t, lp)| TopToken {
            token: t.to_string(),
            logprob: *lp,
        })
        .collect();
    top.sort_by(|a, b| b.logprob.partial_cmp(&a.logprob).unwrap());
    let token_logprob = top
        .iter()
        .find(|t| t.token == token_text)
        .map(|t| t.logprob)
        .unwrap_or(0.0);
    TargetPositionInfo {
        token_text: token_text.to_string(),
        token_id: None,
        token_logprob,
        top_alternatives: top,
        entropy: 0.5,
    }
}

/// Draft model stub that replays scripted rounds and decodes through a
/// fixed id -> text map.
pub struct StubDraftModel {
    rounds: VecDeque<Vec<DraftToken>>,
    decode_map: HashMap<u32, String>,
    tokenize_map: HashMap<String, Vec<u32>>,
    pub draft_calls: usize,
}

impl StubDraftModel {
    pub fn new(rounds: Vec<Vec<DraftToken>>) -> Self {
        Self {
            rounds: rounds.into(),
            decode_map: HashMap::new(),
            tokenize_map: HashMap::new(),
            draft_calls: 0,
        }
    }

    pub fn with_decode(mut self, entries: &[(u32, &str)]) -> Self {
        for (id, text) in entries {
            self.decode_map.insert(*id, (*text).to_string());
        }
        self
    }

    pub fn with_tokenize(mut self, entries: &[(&str, &[u32])]) -> Self {
        for (text, ids) in entries {
            self.tokenize_map.insert((*text).to_string(), ids.to_vec());
        }
        self
    }
}

impl DraftModel for StubDraftModel {
    fn draft(&mut self, _context_ids: &[u32], k: usize, _temperature: f32) -> Result<Vec<DraftToken>> {
        self.draft_calls += 1;
        let round = self
            .rounds
            .pop_front()
            .ok_or_else(|| Error::LocalInference("stub has no more scripted rounds".to_string()))?;
        Ok(round.into_iter().take(k).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        Ok(ids
            .iter()
            .map(|id| {
                self.decode_map
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| format!("[{id}]"))
            })
            .collect())
    }

    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(self.tokenize_map.get(text).cloned().unwrap_or_else(|| {
            // Stable fallback id derived from the text bytes.
            let id = text.bytes().fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
            vec![id % 10_000]
        }))
    }

    fn prompt_ids(&self, prompt: &str) -> Result<(String, Vec<u32>)> {
        Ok((format!("<user>{prompt}<assistant>"), vec![1, 2, 3]))
    }
}

/// One scripted verification response.
pub enum Scripted {
    /// Fail with a retriable 5xx.
    Fail(u16),
    Ok(VerificationResult),
}

/// Target model stub replaying scripted responses.
pub struct StubTargetModel {
    responses: VecDeque<Scripted>,
    pub verify_calls: usize,
}

impl StubTargetModel {
    pub fn new(responses: Vec<Scripted>) -> Self {
        Self {
            responses: responses.into(),
            verify_calls: 0,
        }
    }

    /// A single-round stub answering with the given positions.
    pub fn single(positions: Vec<TargetPositionInfo>) -> Self {
        Self::new(vec![Scripted::Ok(VerificationResult {
            positions,
            latency_ms: 20.0,
        })])
    }
}

impl TargetModel for StubTargetModel {
    fn verify(
        &mut self,
        _prompt_text: &str,
        _k_plus_one: usize,
        _temperature: f32,
    ) -> Result<VerificationResult> {
        self.verify_calls += 1;
        match self.responses.pop_front() {
            Some(Scripted::Ok(result)) => Ok(result),
            Some(Scripted::Fail(status)) => Err(Error::TransientRemote {
                status: Some(status),
                message: "scripted failure".to_string(),
            }),
            None => Err(Error::InvalidRemote(
                "stub has no more scripted responses".to_string(),
            )),
        }
    }
}

/// Positions where the target lists the draft token above its draft
/// probability, guaranteeing acceptance.
pub fn agreeing_positions(tokens: &[(&str, f64)], bonus: Option<(&str, f64)>) -> Vec<TargetPositionInfo> {
    let mut positions: Vec<TargetPositionInfo> = tokens
        .iter()
        .map(|(text, draft_lp)| target_position(text, &[(text, draft_lp + 0.05)]))
        .collect();
    if let Some((text, lp)) = bonus {
        positions.push(target_position(text, &[(text, lp)]));
    }
    positions
}
