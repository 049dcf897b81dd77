//! Pre-classification rules engine.
//!
//! Runs before the ensemble to short-circuit obvious cases:
//! - polls, voice notes and video notes → Drop
//! - items with neither text nor attachments → Drop
//! - verbatim sources → Route to their fixed destination
//! - attachment-only items → Route per the textless policy (or Drop)
//! - stop-word hits → Drop
//!
//! If the rules engine returns a `RuleAction`, classification is skipped
//! entirely.

use std::sync::Arc;

use tracing::debug;

use crate::pipeline::router::Router;
use crate::pipeline::types::{ContentItem, Destination};
use crate::stopwords::{StaticStopWords, StopWords};

/// Outcome of a matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// Do not republish.
    Drop { reason: String },
    /// Republish to a fixed destination without classification.
    Route {
        destination: Destination,
        reason: String,
    },
}

impl RuleAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Drop { .. } => "drop",
            Self::Route { .. } => "route",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Drop { reason } | Self::Route { reason, .. } => reason,
        }
    }
}

/// Pre-classification rules engine.
pub struct RulesEngine {
    stop_words: Arc<dyn StopWords>,
}

impl RulesEngine {
    pub fn new(stop_words: Arc<dyn StopWords>) -> Self {
        Self { stop_words }
    }

    /// Create a rules engine with no stop words (for testing).
    pub fn empty() -> Self {
        Self::new(Arc::new(StaticStopWords::default()))
    }

    /// Evaluate an item against all rules. Returns `None` when the item needs
    /// classification.
    pub fn evaluate(&self, item: &ContentItem, router: &Router) -> Option<RuleAction> {
        if let Some(kind) = item.unsupported {
            debug!(id = item.id, kind = kind.label(), "Unsupported content kind");
            return Some(RuleAction::Drop {
                reason: format!("unsupported content: {}", kind.label()),
            });
        }

        if !item.has_text() && item.attachments.is_empty() {
            return Some(RuleAction::Drop {
                reason: "empty item".into(),
            });
        }

        if let Some(destination) = router.override_for(item.feed_id()) {
            return Some(RuleAction::Route {
                destination,
                reason: format!("verbatim source {}", item.feed_id()),
            });
        }

        if !item.has_text() {
            let policy = router.textless_policy();
            return Some(match policy.destination() {
                Some(destination) => RuleAction::Route {
                    destination,
                    reason: "attachment-only item".into(),
                },
                None => RuleAction::Drop {
                    reason: "attachment-only item dropped by policy".into(),
                },
            });
        }

        if let Some(word) = self.stop_words.first_hit(&item.text) {
            debug!(id = item.id, word = %word, "Stop word matched");
            return Some(RuleAction::Drop {
                reason: format!("stop word '{word}'"),
            });
        }

        None
    }
}
