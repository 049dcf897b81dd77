//! Error types for the feed relay.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Feed transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Lookup of {what} failed on channel {name}: {reason}")]
    LookupFailed {
        name: String,
        what: String,
        reason: String,
    },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Judgment backend errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Ensemble classification errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("No judgment backends are registered")]
    NoBackends,

    #[error("Ensemble returned no valid votes after {rounds} rounds")]
    EnsembleExhausted { rounds: u32 },
}

/// Per-item pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Dispatch to {destination} failed after {sent} of {total} deliveries: {source}")]
    Dispatch {
        destination: String,
        sent: usize,
        total: usize,
        #[source]
        source: ChannelError,
    },

    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifyError),
}

