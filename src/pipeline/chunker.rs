//! Splits rendered markup into size-bounded segments.
//!
//! Budgets are measured in chars of markup. The first segment of a post with
//! attachments is sent as a media caption and uses the (smaller) caption
//! budget; every other segment uses the body budget.
//!
//! Cuts are taken only at the split points recorded by the renderer, in
//! preference order paragraph → line → sentence → whitespace → top-level
//! char → nested char. Within the best kind available the furthest point
//! wins, so output is deterministic for a given document and budget.
//!
//! A cut inside an element closes every open tag at the end of the piece and
//! reopens them at the start of the next, and both count against the budget.

use std::ops::Range;

use tracing::{debug, warn};

use crate::pipeline::render::{
    BoundaryKind, RenderedDocument, SplitPoint, closing_tag, open_tags_at,
};
use crate::pipeline::types::{Attachment, Segment};

/// Destination size limits, in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBudget {
    /// Limit for a plain text message.
    pub body: usize,
    /// Limit for a media caption.
    pub caption: usize,
}

impl Default for ChunkBudget {
    fn default() -> Self {
        Self {
            body: 4096,
            caption: 1024,
        }
    }
}

/// Splits rendered documents into segments.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    budget: ChunkBudget,
}

impl Chunker {
    pub fn new(budget: ChunkBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> ChunkBudget {
        self.budget
    }

    /// Split `doc` into segments.
    ///
    /// `attachments` travel with the first segment, which is then flagged as a
    /// caption. `suffix` (already in markup form) is appended to the last
    /// segment, or becomes its own trailing segment when it does not fit.
    pub fn split(
        &self,
        doc: &RenderedDocument,
        attachments: &[Attachment],
        suffix: Option<&str>,
    ) -> Vec<Segment> {
        let has_attachments = !attachments.is_empty();
        let mut segments: Vec<Segment> = Vec::new();

        if doc.is_empty() {
            let body = suffix.map(|s| s.trim_start().to_string()).unwrap_or_default();
            if body.is_empty() && !has_attachments {
                return segments;
            }
            segments.push(Segment {
                body,
                source: 0..0,
                attachments: attachments.to_vec(),
                caption: has_attachments,
            });
            return segments;
        }

        let mut start = 0;
        while start < doc.markup.len() {
            let caption = segments.is_empty() && has_attachments;
            let budget = self.budget_for(caption);

            // A piece starting inside an element reopens it.
            let mut body: String = open_tags_at(&doc.markup, start).concat();
            let piece = self.next_piece(doc, start, budget.saturating_sub(body.chars().count()));
            body.push_str(&doc.markup[piece.range.clone()]);
            body.push_str(&piece.close);

            segments.push(Segment {
                body,
                source: piece.range,
                attachments: if caption {
                    attachments.to_vec()
                } else {
                    Vec::new()
                },
                caption,
            });
            start = piece.resume;
        }

        if let Some(suffix) = suffix {
            self.append_suffix(&mut segments, suffix);
        }

        debug!(
            segments = segments.len(),
            chars = doc.char_len(),
            with_attachments = has_attachments,
            "Document split"
        );
        segments
    }

    fn budget_for(&self, caption: bool) -> usize {
        if caption {
            self.budget.caption
        } else {
            self.budget.body
        }
    }

    /// Pick the cut for the piece starting at `start`.
    ///
    /// `budget` covers the piece's markup plus the closing tags a cut inside
    /// an element needs.
    fn next_piece(&self, doc: &RenderedDocument, start: usize, budget: usize) -> Piece {
        let markup = &doc.markup;
        let limit = match markup[start..].char_indices().nth(budget) {
            Some((byte, _)) => start + byte,
            None => return Piece::to_end(start, markup.len()),
        };

        let first = doc.split_points.partition_point(|p| p.offset <= start);
        let candidates = &doc.split_points[first..];
        let within = &candidates[..candidates.partition_point(|p| p.offset <= limit)];

        let top_level = within
            .iter()
            .filter(|p| p.kind != BoundaryKind::NestedChar)
            .max_by_key(|p| (p.kind, p.offset));
        if let Some(point) = top_level {
            return Piece::at(start, point, String::new());
        }

        // Only cuts inside an element remain: take the furthest one that
        // still fits once the open elements are closed.
        for point in within.iter().rev() {
            let close = closing_tags(markup, point.offset);
            let used = markup[start..point.offset].chars().count() + close.chars().count();
            if used <= budget {
                warn!(
                    offset = point.offset,
                    budget, "No top-level boundary within budget, cutting inside an element"
                );
                return Piece::at(start, point, close);
            }
        }

        // Budget smaller than a single escape or tag run: overshoot to the
        // nearest legal point rather than corrupt markup.
        let fallback: Option<&SplitPoint> = candidates.first();
        warn!(start, budget, "No split point within budget, overshooting");
        match fallback {
            Some(point) => Piece::at(start, point, closing_tags(markup, point.offset)),
            None => Piece::to_end(start, markup.len()),
        }
    }

    fn append_suffix(&self, segments: &mut Vec<Segment>, suffix: &str) {
        let Some(last) = segments.last_mut() else {
            return;
        };

        let budget = self.budget_for(last.caption);
        if last.char_len() + suffix.chars().count() <= budget {
            last.body.push_str(suffix);
            return;
        }

        debug!("Provenance suffix does not fit, sending as its own segment");
        let end = last.source.end;
        segments.push(Segment {
            body: suffix.trim_start().to_string(),
            source: end..end,
            attachments: Vec::new(),
            caption: false,
        });
    }
}

/// One cut of the markup.
struct Piece {
    range: Range<usize>,
    resume: usize,
    /// Closing tags for elements left open at the cut, innermost first.
    close: String,
}

impl Piece {
    fn at(start: usize, point: &SplitPoint, close: String) -> Self {
        Self {
            range: start..point.offset,
            resume: point.resume,
            close,
        }
    }

    fn to_end(start: usize, end: usize) -> Self {
        Self {
            range: start..end,
            resume: end,
            close: String::new(),
        }
    }
}

fn closing_tags(markup: &str, offset: usize) -> String {
    open_tags_at(markup, offset)
        .iter()
        .rev()
        .map(|tag| closing_tag(tag))
        .collect()
}
