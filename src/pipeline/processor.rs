//! Relay processor — takes inbound items from filter to delivery.
//!
//! Flow per item:
//! 1. Rules engine (fast, no backends) → may drop or force a destination
//! 2. Ensemble classification → accept/reject
//! 3. Assemble the logical post, render markup, chunk to budget
//! 4. Dispatch the planned sends to the chosen feed
//!
//! Dispatch is not transactional: a failure after some sends is logged and
//! the item is abandoned. Nothing is rolled back or retried.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::StreamExt;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::channels::{FeedTransport, ItemStream};
use crate::classifier::EnsembleClassifier;
use crate::error::{ClassifyError, PipelineError};
use crate::pipeline::assembler::ContentAssembler;
use crate::pipeline::chunker::Chunker;
use crate::pipeline::render::render;
use crate::pipeline::router::Router;
use crate::pipeline::rules::{RuleAction, RulesEngine};
use crate::pipeline::types::{ContentItem, Destination};

/// How many relayed group keys are remembered for de-duplication.
const HANDLED_GROUPS_CAPACITY: usize = 512;

/// Lifecycle of one inbound item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Received,
    FilteredOut,
    Classifying,
    /// A round produced no valid vote; waiting out the backoff.
    EnsembleEmpty,
    Classified,
    Assembling,
    Rendering,
    Chunking,
    Dispatching,
    Done,
    DispatchFailed,
}

impl ItemState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::FilteredOut => "filtered_out",
            Self::Classifying => "classifying",
            Self::EnsembleEmpty => "ensemble_empty",
            Self::Classified => "classified",
            Self::Assembling => "assembling",
            Self::Rendering => "rendering",
            Self::Chunking => "chunking",
            Self::Dispatching => "dispatching",
            Self::Done => "done",
            Self::DispatchFailed => "dispatch_failed",
        }
    }
}

/// Tracks and logs state transitions of one item.
#[derive(Debug)]
struct StateTracker {
    id: i64,
    state: ItemState,
    history: Vec<ItemState>,
}

impl StateTracker {
    fn new(id: i64) -> Self {
        debug!(id, state = ItemState::Received.label(), "Item state");
        Self {
            id,
            state: ItemState::Received,
            history: vec![ItemState::Received],
        }
    }

    fn to(&mut self, next: ItemState) {
        debug!(
            id = self.id,
            from = self.state.label(),
            to = next.label(),
            "Item state"
        );
        self.state = next;
        self.history.push(next);
    }
}

/// Final outcome of a processed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    FilteredOut {
        reason: String,
    },
    Done {
        destination: Destination,
        /// Number of sends made.
        deliveries: usize,
        /// Ensemble rounds, `None` when classification was skipped.
        rounds: Option<u32>,
    },
}

/// Remembers recently relayed groups so every part of an album is relayed
/// once, by whichever part is processed first.
#[derive(Debug, Default)]
struct HandledGroups {
    order: VecDeque<(i64, String)>,
    keys: HashSet<(i64, String)>,
}

impl HandledGroups {
    fn contains(&self, feed_id: i64, key: &str) -> bool {
        self.keys.contains(&(feed_id, key.to_string()))
    }

    fn insert(&mut self, feed_id: i64, key: &str) {
        let entry = (feed_id, key.to_string());
        if !self.keys.insert(entry.clone()) {
            return;
        }
        self.order.push_back(entry);
        while self.order.len() > HANDLED_GROUPS_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.keys.remove(&old);
            }
        }
    }
}

/// Drives items through the pipeline.
pub struct RelayProcessor {
    transport: Arc<dyn FeedTransport>,
    classifier: Arc<EnsembleClassifier>,
    rules: RulesEngine,
    assembler: ContentAssembler,
    chunker: Chunker,
    router: Router,
    handled_groups: Mutex<HandledGroups>,
}

impl RelayProcessor {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        classifier: Arc<EnsembleClassifier>,
        rules: RulesEngine,
        assembler: ContentAssembler,
        chunker: Chunker,
        router: Router,
    ) -> Self {
        Self {
            transport,
            classifier,
            rules,
            assembler,
            chunker,
            router,
            handled_groups: Mutex::new(HandledGroups::default()),
        }
    }

    /// Consume the stream until it ends. Failures on individual items are
    /// logged and do not stop the loop.
    pub async fn run(&self, mut stream: ItemStream) {
        info!(transport = self.transport.name(), "Relay loop started");
        let mut processed = 0u64;
        while let Some(item) = stream.next().await {
            let span = info_span!(
                "item",
                id = item.id,
                feed_id = item.feed_id(),
                trace = %Uuid::new_v4()
            );
            match self.process(item).instrument(span).await {
                Ok(outcome) => {
                    processed += 1;
                    debug!(?outcome, "Item processed");
                }
                Err(e) => {
                    error!(error = %e, "Failed to process item");
                }
            }
        }
        info!(processed, "Item stream ended, relay loop stopped");
    }

    /// Process a single inbound item through the full pipeline.
    pub async fn process(&self, item: ContentItem) -> Result<ItemOutcome, PipelineError> {
        let mut tracker = StateTracker::new(item.id);
        info!(
            id = item.id,
            feed_id = item.feed_id(),
            attachments = item.attachments.len(),
            grouped = item.group_key.is_some(),
            posted_at = %item.posted_at,
            age_secs = item.age_secs(Utc::now()),
            "Processing inbound item"
        );

        if let Some(reason) = self.group_skip_reason(&item).await {
            tracker.to(ItemState::FilteredOut);
            info!(id = item.id, reason = %reason, "Item filtered out");
            return Ok(ItemOutcome::FilteredOut { reason });
        }

        // Step 1: rules (fast path)
        let (destination, rounds) = match self.rules.evaluate(&item, &self.router) {
            Some(RuleAction::Drop { reason }) => {
                tracker.to(ItemState::FilteredOut);
                info!(id = item.id, reason = %reason, "Item filtered out");
                return Ok(ItemOutcome::FilteredOut { reason });
            }
            Some(RuleAction::Route {
                destination,
                reason,
            }) => {
                debug!(
                    id = item.id,
                    destination = %destination,
                    reason = %reason,
                    "Rules engine matched, skipping classification"
                );
                tracker.to(ItemState::Classified);
                (destination, None)
            }
            None => {
                // Step 2: ensemble classification
                tracker.to(ItemState::Classifying);
                let (destination, rounds) = self.classify(&item, &mut tracker).await?;
                tracker.to(ItemState::Classified);
                (destination, Some(rounds))
            }
        };

        if let Some(key) = item.group_key.as_deref() {
            if let Ok(mut groups) = self.handled_groups.lock() {
                groups.insert(item.feed_id(), key);
            }
        }

        // Step 3: assemble, render, chunk
        tracker.to(ItemState::Assembling);
        let post = self.assembler.assemble(&item).await;

        tracker.to(ItemState::Rendering);
        let doc = render(&post.text, &post.spans);

        tracker.to(ItemState::Chunking);
        let suffix = self.router.provenance_suffix(&post.provenance);
        let segments = self.chunker.split(&doc, &post.attachments, Some(&suffix));
        let deliveries = self.router.plan(segments);

        // Step 4: dispatch
        tracker.to(ItemState::Dispatching);
        let total = deliveries.len();
        for (sent, delivery) in deliveries.into_iter().enumerate() {
            let kind = delivery.label();
            if let Err(source) = self.transport.deliver(destination, delivery).await {
                tracker.to(ItemState::DispatchFailed);
                error!(
                    id = item.id,
                    destination = %destination,
                    sent,
                    total,
                    kind,
                    error = %source,
                    "Dispatch failed, earlier sends are not rolled back"
                );
                return Err(PipelineError::Dispatch {
                    destination: destination.to_string(),
                    sent,
                    total,
                    source,
                });
            }
        }

        tracker.to(ItemState::Done);
        info!(
            id = item.id,
            items = ?post.item_ids,
            destination = %destination,
            deliveries = total,
            source = %post.provenance.label(),
            "Post relayed"
        );
        Ok(ItemOutcome::Done {
            destination,
            deliveries: total,
            rounds,
        })
    }

    /// Run the ensemble and map its decision to a destination.
    ///
    /// When the retry cap is hit the item is routed as rejected.
    async fn classify(
        &self,
        item: &ContentItem,
        tracker: &mut StateTracker,
    ) -> Result<(Destination, u32), PipelineError> {
        let result = self
            .classifier
            .classify_observed(&item.text, |_round| {
                tracker.to(ItemState::EnsembleEmpty);
                tracker.to(ItemState::Classifying);
            })
            .await;

        match result {
            Ok(result) => Ok((self.router.route(result.decision), result.rounds)),
            Err(ClassifyError::EnsembleExhausted { rounds }) => {
                warn!(
                    id = item.id,
                    rounds, "Ensemble exhausted, routing as rejected"
                );
                Ok((Destination::Secondary, rounds))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reason to skip a grouped item whose group is handled elsewhere.
    ///
    /// A group already relayed is skipped. An attachment-only part is skipped
    /// when a sibling carries text, since that sibling will relay the group.
    async fn group_skip_reason(&self, item: &ContentItem) -> Option<String> {
        let key = item.group_key.as_deref()?;

        let handled = self
            .handled_groups
            .lock()
            .map(|groups| groups.contains(item.feed_id(), key))
            .unwrap_or(false);
        if handled {
            return Some(format!("group {key} already relayed"));
        }

        if item.has_text() || item.unsupported.is_some() {
            return None;
        }
        self.assembler
            .collect_group(item)
            .await
            .iter()
            .find(|sibling| sibling.id != item.id && sibling.has_text())
            .map(|sibling| format!("text carried by sibling {}", sibling.id))
    }
}
