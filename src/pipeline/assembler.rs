//! Rebuilds one logical post from its album parts.
//!
//! Album posts arrive as several items sharing a group key, each carrying
//! part of the text and media. Siblings are collected from a window of
//! neighbouring ids around the trigger. This is best effort: a sibling that
//! has not reached the transport yet is simply missed.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::channels::FeedTransport;
use crate::pipeline::types::{AssembledPost, ContentItem, Provenance, RichSpan};

/// Default half-width of the sibling id window.
pub const DEFAULT_GROUP_WINDOW: i64 = 10;

/// Separator placed between the texts of merged items.
const PART_SEPARATOR: &str = "\n\n";

/// Merges grouped items and resolves their provenance.
pub struct ContentAssembler {
    transport: Arc<dyn FeedTransport>,
    window: i64,
}

impl ContentAssembler {
    pub fn new(transport: Arc<dyn FeedTransport>, window: i64) -> Self {
        Self {
            transport,
            window: window.max(0),
        }
    }

    /// Assemble the logical post the trigger belongs to.
    pub async fn assemble(&self, trigger: &ContentItem) -> AssembledPost {
        let items = self.collect_group(trigger).await;
        let provenance = self.resolve_provenance(trigger).await;
        let mut post = merge_items(&items);
        post.provenance = provenance;
        post
    }

    /// Trigger plus every sibling with the same group key in the id window,
    /// ordered by id.
    pub async fn collect_group(&self, trigger: &ContentItem) -> Vec<ContentItem> {
        let mut by_id: BTreeMap<i64, ContentItem> = BTreeMap::new();
        by_id.insert(trigger.id, trigger.clone());

        let Some(group_key) = trigger.group_key.as_deref() else {
            return by_id.into_values().collect();
        };

        let feed_id = trigger.feed_id();
        for id in (trigger.id - self.window)..=(trigger.id + self.window) {
            if id == trigger.id || id <= 0 {
                continue;
            }
            match self.transport.lookup(feed_id, id).await {
                Ok(Some(item)) if item.group_key.as_deref() == Some(group_key) => {
                    by_id.insert(item.id, item);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        feed_id,
                        id,
                        error = %e,
                        "Sibling lookup failed, continuing with what was found"
                    );
                }
            }
        }

        debug!(
            feed_id,
            group_key,
            parts = by_id.len(),
            "Collected grouped post"
        );
        by_id.into_values().collect()
    }

    /// Original source when the trigger is a forwarded copy, else the
    /// hosting feed. Lookup failure yields an opaque placeholder.
    pub async fn resolve_provenance(&self, trigger: &ContentItem) -> Provenance {
        let feed_id = trigger.provenance.origin_feed();
        match self.transport.resolve_identity(feed_id).await {
            Ok(identity) => Provenance::Resolved { feed_id, identity },
            Err(e) => {
                warn!(feed_id, error = %e, "Identity lookup failed, using placeholder");
                Provenance::opaque(feed_id)
            }
        }
    }
}

/// Merge items (already ordered) into one text with rebased spans.
///
/// The returned post carries a placeholder provenance for the first item's
/// origin; [`ContentAssembler::assemble`] replaces it with the resolved one.
pub fn merge_items(items: &[ContentItem]) -> AssembledPost {
    let mut text = String::new();
    let mut text_chars = 0usize;
    let mut spans: Vec<RichSpan> = Vec::new();
    let mut attachments = Vec::new();

    for item in items {
        attachments.extend(item.attachments.iter().cloned());

        let (trimmed, item_spans) = trim_with_spans(&item.text, &item.spans);
        if trimmed.is_empty() {
            continue;
        }

        if !text.is_empty() {
            text.push_str(PART_SEPARATOR);
            text_chars += PART_SEPARATOR.chars().count();
        }
        spans.extend(item_spans.iter().map(|s| s.shifted(text_chars)));
        text.push_str(trimmed);
        text_chars += trimmed.chars().count();
    }

    let origin = items
        .first()
        .map(|i| i.provenance.origin_feed())
        .unwrap_or_default();

    AssembledPost {
        item_ids: items.iter().map(|i| i.id).collect(),
        text,
        spans,
        attachments,
        provenance: Provenance::opaque(origin),
    }
}

/// Trim surrounding whitespace, moving spans with the text.
///
/// Spans are shifted left by the number of removed leading chars and clamped
/// to the trimmed length; spans left empty are dropped.
fn trim_with_spans<'a>(text: &'a str, spans: &[RichSpan]) -> (&'a str, Vec<RichSpan>) {
    let without_leading = text.trim_start();
    let lead = text[..text.len() - without_leading.len()].chars().count();
    let trimmed = without_leading.trim_end();
    let len = trimmed.chars().count();

    let adjusted = spans
        .iter()
        .filter_map(|span| {
            let start = span.start.saturating_sub(lead);
            let end = span.end.saturating_sub(lead).min(len);
            (end > start).then(|| RichSpan::new(start, end, span.kind.clone()))
        })
        .collect();

    (trimmed, adjusted)
}
