//! Sinks for human-readable status lines about classification.
//!
//! Separate from `tracing`: these lines are meant for operators watching the
//! secondary feed. Emitting is best effort and never fails the pipeline.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::channels::FeedTransport;
use crate::pipeline::render::escape_html;
use crate::pipeline::types::{Delivery, Destination};

/// Receiver of diagnostic lines.
#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    async fn emit(&self, line: &str);
}

/// Mirrors lines into the log.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl DiagnosticSink for TracingSink {
    async fn emit(&self, line: &str) {
        info!(target: "feed_relay::diagnostics", "{line}");
    }
}

/// Posts lines as plain text messages to a destination feed.
pub struct FeedSink {
    transport: Arc<dyn FeedTransport>,
    destination: Destination,
}

impl FeedSink {
    pub fn new(transport: Arc<dyn FeedTransport>, destination: Destination) -> Self {
        Self {
            transport,
            destination,
        }
    }
}

#[async_trait]
impl DiagnosticSink for FeedSink {
    async fn emit(&self, line: &str) {
        let delivery = Delivery::Text(escape_html(line));
        if let Err(e) = self.transport.deliver(self.destination, delivery).await {
            warn!(
                destination = %self.destination,
                error = %e,
                "Failed to post diagnostic line"
            );
        }
    }
}

/// Forwards every line to each inner sink, in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn DiagnosticSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn DiagnosticSink>) {
        self.sinks.push(sink);
    }
}

#[async_trait]
impl DiagnosticSink for FanoutSink {
    async fn emit(&self, line: &str) {
        for sink in &self.sinks {
            sink.emit(line).await;
        }
    }
}

/// Collects lines in memory. Used by tests and embedders.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DiagnosticSink for MemorySink {
    async fn emit(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}
