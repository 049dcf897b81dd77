//! Judgment backend trait.

use async_trait::async_trait;

use crate::error::LlmError;

/// One independent, possibly unreliable, judgment service.
///
/// Implementations return the raw answer text. Interpreting it as a vote is
/// the classifier's job.
#[async_trait]
pub trait JudgmentBackend: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Send `prompt` and return the raw answer.
    async fn call(&self, prompt: &str) -> Result<String, LlmError>;
}
