//! OpenAI-compatible chat completion backend.
//!
//! Works against any endpoint speaking `POST {base_url}/chat/completions`
//! (OpenAI itself, local gateways, free proxy aggregators). When the primary
//! model call fails and a fallback model is configured, the call is retried
//! once with the fallback before the error is reported.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::LlmError;
use crate::llm::backend::JudgmentBackend;

/// Sampling temperature for judgment calls. Answers are one word.
const JUDGMENT_TEMPERATURE: f32 = 0.0;

/// Max chars of an error body kept in the error message.
const ERROR_BODY_LIMIT: usize = 100;

/// Static description of one backend, as read from the backends file.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSpec {
    /// Name used in diagnostics.
    pub name: String,
    /// Base URL up to and including the API version, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    /// Model retried once when the primary call fails.
    #[serde(default)]
    pub fallback_model: Option<String>,
    #[serde(default)]
    pub api_key: Option<SecretString>,
}

/// Backend talking to an OpenAI-compatible endpoint.
pub struct OpenAiCompatBackend {
    spec: BackendSpec,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(spec: BackendSpec) -> Self {
        Self {
            spec,
            client: reqwest::Client::new(),
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.spec.base_url.trim_end_matches('/')
        )
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": JUDGMENT_TEMPERATURE,
        });

        let mut request = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.spec.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let resp = request.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.spec.name.clone(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(LlmError::AuthFailed {
                provider: self.spec.name.clone(),
            });
        }
        if !status.is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: self.spec.name.clone(),
                reason: format!("{status}: {}", truncate(&err, ERROR_BODY_LIMIT)),
            });
        }

        let data: serde_json::Value = resp.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: self.spec.name.clone(),
            reason: e.to_string(),
        })?;
        extract_content(&self.spec.name, &data)
    }
}

#[async_trait]
impl JudgmentBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn call(&self, prompt: &str) -> Result<String, LlmError> {
        match self.complete(&self.spec.model, prompt).await {
            Ok(answer) => Ok(answer),
            Err(first) => {
                let Some(fallback) = self.spec.fallback_model.as_deref() else {
                    return Err(first);
                };
                tracing::debug!(
                    backend = %self.spec.name,
                    fallback,
                    error = %first,
                    "Primary model failed, retrying with fallback"
                );
                self.complete(fallback, prompt).await
            }
        }
    }
}

/// Pull `choices[0].message.content` out of a completion response.
fn extract_content(provider: &str, data: &serde_json::Value) -> Result<String, LlmError> {
    data.get("choices")
        .and_then(serde_json::Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(serde_json::Value::as_str)
        .map(String::from)
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: "no choices[0].message.content in response".into(),
        })
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
