//! Ensemble classification of post texts.
//!
//! Many independent, unreliable judgment backends are polled concurrently and
//! their one-word answers are reduced to an accept/reject decision.

pub mod ensemble;
pub mod probe;
pub mod prompt;
pub mod vote;

pub use ensemble::{EnsembleClassifier, ProviderRegistry, RetryPolicy, RoundOutcome, registry};
pub use probe::{ProbeReport, probe_backends};
pub use vote::{
    ClassificationResult, ClassificationVote, Decision, Tally, Verdict, VoteLabels, VoteOutcome,
};
