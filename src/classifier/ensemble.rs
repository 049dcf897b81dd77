//! Ensemble classifier — polls every registered backend and takes a vote.
//!
//! Flow per post:
//! 1. Sanitize the text and build the prompt (once)
//! 2. Round: snapshot the registry, call all backends concurrently, each under
//!    its own timeout, and wait for every one of them
//! 3. Tally valid votes; no valid vote at all → back off and run another round
//!
//! Votes never leak between rounds or posts: a round only looks at the futures
//! it created.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::classifier::prompt::{MAX_PROMPT_TEXT_CHARS, build_prompt, sanitize};
use crate::classifier::vote::{
    ClassificationResult, ClassificationVote, Tally, VoteLabels, VoteOutcome,
};
use crate::diagnostics::DiagnosticSink;
use crate::error::{ClassifyError, LlmError};
use crate::llm::JudgmentBackend;

/// Shared, mutable set of backends. Snapshotted once per round.
pub type ProviderRegistry = Arc<RwLock<Vec<Arc<dyn JudgmentBackend>>>>;

/// Default per-backend call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause after a round with no valid votes.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1800);

/// Max chars of a backend error shown in diagnostics.
const ERROR_PREVIEW_CHARS: usize = 100;

/// What to do when a round yields no valid votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    /// Give up after this many rounds. `None` retries forever.
    pub max_rounds: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
            max_rounds: None,
        }
    }
}

/// Result of one polling round.
#[derive(Debug)]
pub enum RoundOutcome {
    Decided {
        tally: Tally,
        votes: Vec<ClassificationVote>,
    },
    /// No backend produced a valid vote.
    Empty { votes: Vec<ClassificationVote> },
}

/// Build a registry from a list of backends.
pub fn registry(backends: Vec<Arc<dyn JudgmentBackend>>) -> ProviderRegistry {
    Arc::new(RwLock::new(backends))
}

pub struct EnsembleClassifier {
    registry: ProviderRegistry,
    sink: Arc<dyn DiagnosticSink>,
    labels: VoteLabels,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl EnsembleClassifier {
    pub fn new(registry: ProviderRegistry, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            registry,
            sink,
            labels: VoteLabels::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_labels(mut self, labels: VoteLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Handle to the live registry, for adding or removing backends.
    pub fn registry(&self) -> ProviderRegistry {
        Arc::clone(&self.registry)
    }

    /// Classify a post text, retrying rounds until a valid vote arrives or
    /// the retry cap is reached.
    pub async fn classify(&self, text: &str) -> Result<ClassificationResult, ClassifyError> {
        self.classify_observed(text, |_| {}).await
    }

    /// Like [`classify`](Self::classify), calling `on_empty` with the round
    /// number after every round that produced no valid vote and will be
    /// retried.
    pub async fn classify_observed(
        &self,
        text: &str,
        mut on_empty: impl FnMut(u32) + Send,
    ) -> Result<ClassificationResult, ClassifyError> {
        let sanitized = sanitize(text);
        if sanitized.truncated {
            self.sink
                .emit(&format!(
                    "⚠️ Post text truncated to {MAX_PROMPT_TEXT_CHARS} chars (was {})",
                    sanitized.cleaned_chars
                ))
                .await;
        }
        let prompt = build_prompt(&sanitized.text, &self.labels);

        let mut rounds = 0u32;
        loop {
            rounds += 1;
            match self.run_round(&prompt).await? {
                RoundOutcome::Decided { tally, votes } => {
                    let decision = tally.decision();
                    self.sink
                        .emit(&format!(
                            "📊 Round {rounds}: {} → {}",
                            tally.summary(&self.labels),
                            decision.label()
                        ))
                        .await;
                    info!(
                        rounds,
                        useful = tally.useful,
                        ad = tally.ad,
                        useless = tally.useless,
                        decision = decision.label(),
                        "Ensemble decided"
                    );
                    return Ok(ClassificationResult {
                        tally,
                        decision,
                        rounds,
                        votes,
                    });
                }
                RoundOutcome::Empty { votes } => {
                    warn!(rounds, backends = votes.len(), "Ensemble round produced no valid votes");

                    if self.retry.max_rounds.is_some_and(|max| rounds >= max) {
                        self.sink
                            .emit(&format!(
                                "❌ No valid answers after {rounds} rounds, giving up"
                            ))
                            .await;
                        return Err(ClassifyError::EnsembleExhausted { rounds });
                    }

                    self.sink
                        .emit(&format!(
                            "❌ No backend gave a valid answer (round {rounds}). Retrying in {}s",
                            self.retry.backoff.as_secs()
                        ))
                        .await;
                    on_empty(rounds);
                    tokio::time::sleep(self.retry.backoff).await;
                }
            }
        }
    }

    /// Poll every backend once with `prompt`.
    pub async fn run_round(&self, prompt: &str) -> Result<RoundOutcome, ClassifyError> {
        let backends: Vec<Arc<dyn JudgmentBackend>> = self.registry.read().await.clone();
        if backends.is_empty() {
            return Err(ClassifyError::NoBackends);
        }

        let calls = backends.iter().map(|backend| self.poll(backend.as_ref(), prompt));
        let votes = join_all(calls).await;

        let total = votes.len();
        for (i, vote) in votes.iter().enumerate() {
            self.sink.emit(&self.vote_line(i + 1, total, vote)).await;
        }

        let tally = Tally::from_votes(&votes);
        if tally.valid() == 0 {
            Ok(RoundOutcome::Empty { votes })
        } else {
            Ok(RoundOutcome::Decided { tally, votes })
        }
    }

    async fn poll(&self, backend: &dyn JudgmentBackend, prompt: &str) -> ClassificationVote {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.call_timeout, backend.call(prompt)).await {
            Ok(Ok(raw)) => match self.labels.parse(&raw) {
                Ok(verdict) => VoteOutcome::Valid(verdict),
                Err(normalized) => VoteOutcome::Malformed(normalized),
            },
            Ok(Err(e)) => VoteOutcome::Failed(e.to_string()),
            Err(_) => VoteOutcome::Failed(
                LlmError::Timeout {
                    provider: backend.name().to_string(),
                    timeout: self.call_timeout,
                }
                .to_string(),
            ),
        };
        let latency = started.elapsed();

        debug!(
            backend = backend.name(),
            outcome = ?outcome,
            latency_ms = latency.as_millis() as u64,
            "Backend vote"
        );

        ClassificationVote {
            backend: backend.name().to_string(),
            outcome,
            latency,
        }
    }

    fn vote_line(&self, index: usize, total: usize, vote: &ClassificationVote) -> String {
        match &vote.outcome {
            VoteOutcome::Valid(verdict) => format!(
                "{index}/{total} ✅ {}: {}",
                vote.backend,
                self.labels.label(*verdict)
            ),
            VoteOutcome::Malformed(answer) => {
                format!("{index}/{total} ⚠️ {} odd answer: '{answer}'", vote.backend)
            }
            VoteOutcome::Failed(reason) => format!(
                "{index}/{total} ❌ {} error: {}",
                vote.backend,
                reason.chars().take(ERROR_PREVIEW_CHARS).collect::<String>()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::classifier::vote::{Decision, Verdict};
    use crate::diagnostics::MemorySink;

    /// Backend with a scripted answer. `fail_first` rounds error out first.
    struct StubBackend {
        name: String,
        answer: Result<String, String>,
        fail_first: u32,
        delay: Duration,
        calls: AtomicU32,
    }

    impl StubBackend {
        fn answering(name: &str, answer: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                answer: Ok(answer.into()),
                fail_first: 0,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                answer: Err("connection refused".into()),
                fail_first: 0,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn recovering(name: &str, answer: &str, fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                answer: Ok(answer.into()),
                fail_first,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn slow(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                answer: Ok("полезно".into()),
                fail_first: 0,
                delay,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JudgmentBackend for StubBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn call(&self, _prompt: &str) -> Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if n < self.fail_first {
                return Err(LlmError::RequestFailed {
                    provider: self.name.clone(),
                    reason: "warming up".into(),
                });
            }
            self.answer.clone().map_err(|reason| LlmError::RequestFailed {
                provider: self.name.clone(),
                reason,
            })
        }
    }

    fn classifier(
        backends: Vec<Arc<dyn JudgmentBackend>>,
        sink: Arc<MemorySink>,
    ) -> EnsembleClassifier {
        EnsembleClassifier::new(registry(backends), sink)
    }

    fn answers(list: &[&str]) -> Vec<Arc<dyn JudgmentBackend>> {
        list.iter()
            .enumerate()
            .map(|(i, a)| StubBackend::answering(&format!("b{i}"), a) as Arc<dyn JudgmentBackend>)
            .collect()
    }

    #[tokio::test]
    async fn three_useful_of_five_accepts() {
        let sink = Arc::new(MemorySink::new());
        let c = classifier(
            answers(&["полезно", "Полезно.", "полезно", "реклама", "бесполезно"]),
            sink.clone(),
        );

        let result = c.classify("Кейс: ROI 140% на нутре").await.unwrap();
        assert_eq!(result.decision, Decision::Accept);
        assert_eq!(result.tally.useful, 3);
        assert_eq!(result.rounds, 1);
        assert_eq!(result.votes.len(), 5);

        let lines = sink.lines();
        assert_eq!(lines[0], "1/5 ✅ b0: полезно");
        assert!(lines.last().unwrap().contains("accept"));
    }

    #[tokio::test]
    async fn custom_labels_are_matched() {
        let sink = Arc::new(MemorySink::new());
        let labels = VoteLabels::new("useful", "ad", "useless", "a-z").unwrap();
        let c = classifier(answers(&["Useful", "useful!", "полезно"]), sink.clone())
            .with_labels(labels);

        let result = c.classify("text").await.unwrap();
        assert_eq!(result.tally.useful, 2);
        assert_eq!(result.tally.valid(), 2);
        assert_eq!(result.decision, Decision::Accept);
        assert!(sink.lines()[2].contains("odd answer"));
    }

    #[tokio::test]
    async fn two_two_one_rejects() {
        let sink = Arc::new(MemorySink::new());
        let c = classifier(
            answers(&["полезно", "полезно", "реклама", "реклама", "бесполезно"]),
            sink,
        );
        let result = c.classify("text").await.unwrap();
        assert_eq!(result.decision, Decision::Reject);
    }

    #[tokio::test]
    async fn malformed_and_failed_votes_are_omitted() {
        let sink = Arc::new(MemorySink::new());
        let backends: Vec<Arc<dyn JudgmentBackend>> = vec![
            StubBackend::answering("good", "полезно"),
            StubBackend::answering("chatty", "Я думаю, что это полезный пост"),
            StubBackend::failing("down"),
        ];
        let c = classifier(backends, sink.clone());

        let result = c.classify("text").await.unwrap();
        assert_eq!(result.tally.valid(), 1);
        assert_eq!(result.decision, Decision::Accept);
        assert_eq!(result.votes[0].verdict(), Some(Verdict::Useful));
        assert!(matches!(result.votes[1].outcome, VoteOutcome::Malformed(_)));
        assert!(matches!(result.votes[2].outcome, VoteOutcome::Failed(_)));

        let lines = sink.lines();
        assert!(lines[1].starts_with("2/3 ⚠️ chatty odd answer"));
        assert!(lines[2].starts_with("3/3 ❌ down error"));
    }

    #[tokio::test]
    async fn empty_registry_is_an_error() {
        let c = classifier(Vec::new(), Arc::new(MemorySink::new()));
        assert!(matches!(
            c.classify("text").await,
            Err(ClassifyError::NoBackends)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_rounds_back_off_once_each() {
        let backoff = Duration::from_secs(1800);
        let flaky = StubBackend::recovering("flaky", "реклама", 2);
        let c = classifier(
            vec![flaky.clone() as Arc<dyn JudgmentBackend>],
            Arc::new(MemorySink::new()),
        ).with_retry(
            RetryPolicy {
                backoff,
                max_rounds: None,
            },
        );

        let start = tokio::time::Instant::now();
        let result = c.classify("text").await.unwrap();

        assert_eq!(result.rounds, 3);
        assert_eq!(flaky.calls(), 3);
        assert_eq!(result.decision, Decision::Reject);
        let elapsed = start.elapsed();
        assert!(elapsed >= backoff * 2 && elapsed < backoff * 3, "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn observer_sees_each_retried_round() {
        let flaky = StubBackend::recovering("flaky", "полезно", 2);
        let c = classifier(
            vec![flaky as Arc<dyn JudgmentBackend>],
            Arc::new(MemorySink::new()),
        );
        let mut empty_rounds = Vec::new();
        let result = c
            .classify_observed("text", |round| empty_rounds.push(round))
            .await
            .unwrap();
        assert_eq!(empty_rounds, vec![1, 2]);
        assert_eq!(result.rounds, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_cap_exhausts() {
        let backoff = Duration::from_secs(60);
        let down = StubBackend::failing("down");
        let sink = Arc::new(MemorySink::new());
        let c = classifier(vec![down.clone() as Arc<dyn JudgmentBackend>], sink.clone()).with_retry(RetryPolicy {
            backoff,
            max_rounds: Some(3),
        });

        let start = tokio::time::Instant::now();
        let err = c.classify("text").await.unwrap_err();

        assert!(matches!(err, ClassifyError::EnsembleExhausted { rounds: 3 }));
        assert_eq!(down.calls(), 3);
        // No sleep after the final round.
        let elapsed = start.elapsed();
        assert!(elapsed >= backoff * 2 && elapsed < backoff * 3, "elapsed {elapsed:?}");
        assert!(sink.lines().last().unwrap().contains("giving up"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let backends: Vec<Arc<dyn JudgmentBackend>> = vec![
            StubBackend::slow("sloth", Duration::from_secs(120)),
            StubBackend::answering("quick", "бесполезно"),
        ];
        let c = classifier(backends, Arc::new(MemorySink::new()))
            .with_call_timeout(Duration::from_secs(30));

        let result = c.classify("text").await.unwrap();
        assert!(matches!(result.votes[0].outcome, VoteOutcome::Failed(ref r) if r.contains("timed out")));
        assert_eq!(result.tally.useless, 1);
        assert_eq!(result.decision, Decision::Reject);
    }

    #[tokio::test]
    async fn registry_changes_apply_to_next_round() {
        let c = classifier(answers(&["реклама"]), Arc::new(MemorySink::new()));
        assert_eq!(c.classify("x").await.unwrap().decision, Decision::Reject);

        c.registry()
            .write()
            .await
            .extend(answers(&["полезно", "полезно"]));
        let result = c.classify("x").await.unwrap();
        assert_eq!(result.votes.len(), 3);
        assert_eq!(result.decision, Decision::Accept);
    }

    #[tokio::test]
    async fn long_text_emits_truncation_notice() {
        let sink = Arc::new(MemorySink::new());
        let c = classifier(answers(&["полезно"]), sink.clone());
        c.classify(&"слово ".repeat(500)).await.unwrap();
        assert!(sink.lines()[0].starts_with("⚠️ Post text truncated to 2000 chars"));
    }
}
