//! Speculative decoding.
//!
//! A small local draft model proposes K tokens per round; one batched
//! request to the large remote target scores K+1 positions; modified
//! rejection sampling decides which drafts survive. The joint output
//! distribution is provably identical to sampling the target directly.
//!
//! ```text
//! Draft (K=4):   [context] -> t1 -> t2 -> t3 -> t4        (local, fast)
//! Verify:        one completions call, K+1 positions       (remote, batched)
//! Rejection:     accept t1, t2; reject t3 -> resample t3'  (exact)
//! ```

pub mod engine;
pub mod sampler;

pub use engine::{CancelToken, Speculator};
pub use sampler::{Outcome, RejectionSampler, Verdict};
