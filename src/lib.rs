//! specstream: a speculative decoding orchestrator with a streaming
//! event feed.
//!
//! A small local draft model proposes tokens; a large remote target model
//! verifies them in batches; modified rejection sampling keeps the output
//! distribution exactly equal to the target's. Every draft, acceptance,
//! rejection, resample, and bonus token is emitted as a typed event so a
//! front-end can animate the process and chart rolling speedup.
//!
//! The crate provides the orchestrator ([`Speculator`]), the model seams
//! ([`DraftModel`], [`TargetModel`]), the wire-level event schema, and a
//! reqwest-based completions client. Transports and front-ends sit behind
//! the [`EventSink`] trait.

pub mod config;
pub mod error;

pub mod context;
pub mod draft;
pub mod events;
pub mod metrics;
pub mod speculative;
pub mod target;

pub use config::Settings;
pub use context::ContextState;
pub use draft::{ChatTemplate, DraftBackend, DraftModel, DraftToken, LocalDraftModel};
pub use error::{Error, Result};
pub use events::{
    Event, EventSink, GenerationRequest, StaggerSink, StartRequest, TokenStatus, TopToken, VecSink,
};
pub use metrics::{MetricsTracker, RoundStats};
pub use speculative::{CancelToken, RejectionSampler, Speculator, Verdict};
pub use target::{
    CompletionsClient, PromptFormat, TargetModel, TargetPositionInfo, VerificationResult,
};
