//! Judgment backends for the classifier ensemble.
//!
//! Supports:
//! - **OpenAI-compatible chat completions** over plain reqwest, one backend per
//!   configured endpoint/model pair, with an optional fallback model.
//!
//! Backends are described in a JSON file (see [`BackendSpec`]) and turned into
//! `Arc<dyn JudgmentBackend>` handles by [`create_backends`].

pub mod backend;
pub mod openai_compat;

pub use backend::JudgmentBackend;
pub use openai_compat::{BackendSpec, OpenAiCompatBackend};

use std::path::Path;
use std::sync::Arc;

use crate::error::ConfigError;

/// Read backend descriptions from a JSON file holding an array of specs.
pub fn load_backend_specs(path: &Path) -> Result<Vec<BackendSpec>, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        ConfigError::ParseError(format!("{}: {e}", path.display()))
    })
}

/// Create one backend per spec, in spec order.
pub fn create_backends(specs: &[BackendSpec]) -> Vec<Arc<dyn JudgmentBackend>> {
    specs
        .iter()
        .map(|spec| {
            tracing::info!(
                backend = %spec.name,
                model = %spec.model,
                fallback = spec.fallback_model.as_deref().unwrap_or("-"),
                "Registered judgment backend"
            );
            Arc::new(OpenAiCompatBackend::new(spec.clone())) as Arc<dyn JudgmentBackend>
        })
        .collect()
}
