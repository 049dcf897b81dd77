//! Relay pipeline.
//!
//! Every inbound item flows through:
//! 1. `RulesEngine::evaluate()` — fast filters and forced routes (no backends)
//! 2. `EnsembleClassifier::classify()` — majority vote of judgment backends
//! 3. `ContentAssembler::assemble()` — merge album parts, resolve provenance
//! 4. `render()` — offset spans to nested HTML markup with split points
//! 5. `Chunker::split()` — size-bounded segments
//! 6. `Router::plan()` — albums and text messages for the chosen feed

pub mod assembler;
pub mod chunker;
pub mod processor;
pub mod render;
pub mod router;
pub mod rules;
pub mod types;

pub use assembler::ContentAssembler;
pub use chunker::{ChunkBudget, Chunker};
pub use processor::{ItemOutcome, ItemState, RelayProcessor};
pub use router::{Router, TextlessPolicy};
pub use rules::{RuleAction, RulesEngine};
