//! Feed Relay — classifies channel posts with an ensemble of LLM backends
//! and republishes them to a primary or secondary feed.

pub mod channels;
pub mod classifier;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod stopwords;
