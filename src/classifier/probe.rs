//! Checks which configured backends answer at all.
//!
//! Run before going live to weed out dead endpoints. Every backend gets the
//! same trivial question; concurrency is bounded by a semaphore.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::info;

use crate::llm::JudgmentBackend;

/// Question sent to every backend during a probe.
pub const PROBE_PROMPT: &str = "Ответь одним словом: помидор красный или фиолетовый?";

/// Default number of backends probed at once.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 20;

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub backend: String,
    /// Cleaned answer, or the failure reason.
    pub answer: Result<String, String>,
    pub latency: Duration,
}

impl ProbeReport {
    pub fn is_alive(&self) -> bool {
        matches!(&self.answer, Ok(a) if !a.is_empty())
    }
}

/// Ask every backend [`PROBE_PROMPT`] and report what came back, in
/// backend order.
pub async fn probe_backends(
    backends: &[Arc<dyn JudgmentBackend>],
    timeout: Duration,
    concurrency: usize,
) -> Vec<ProbeReport> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let total = backends.len();

    let probes = backends.iter().map(|backend| {
        let permits = Arc::clone(&permits);
        async move {
            let _permit = permits.acquire().await;
            let started = Instant::now();
            let answer = match tokio::time::timeout(timeout, backend.call(PROBE_PROMPT)).await {
                Ok(Ok(raw)) => Ok(raw.trim().replace(['\r', '\n'], " ")),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("no answer within {}s", timeout.as_secs())),
            };
            ProbeReport {
                backend: backend.name().to_string(),
                answer,
                latency: started.elapsed(),
            }
        }
    });

    let reports = join_all(probes).await;
    let alive = reports.iter().filter(|r| r.is_alive()).count();
    info!(alive, total, "Backend probe complete");
    reports
}
