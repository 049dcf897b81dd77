//! Turns offset-based spans into nested Telegram HTML.
//!
//! Rendering is a single left-to-right scan over the text with an explicit
//! stack of open spans. Spans open in start order and close in reverse
//! opening order. When a span ends while spans opened after it are still
//! open, those are closed first and reopened right after, so partially
//! overlapping spans still produce well-formed markup.
//!
//! While writing, the renderer records where the markup may legally be cut
//! (see [`SplitPoint`]), which is what the chunker works from.

use std::cmp::Reverse;

use tracing::debug;

use crate::pipeline::types::{RichSpan, SpanKind};

/// Kind of boundary at a split point, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BoundaryKind {
    /// Cut between two characters inside an open element.
    NestedChar,
    /// Cut between two characters outside every element.
    Char,
    Whitespace,
    Sentence,
    Line,
    Paragraph,
}

/// A legal place to cut the markup.
///
/// The piece before the cut ends at `offset`; the next piece starts at
/// `resume`. The bytes between them are boundary whitespace that is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPoint {
    pub offset: usize,
    pub resume: usize,
    pub kind: BoundaryKind,
}

/// Markup plus its legal split points, sorted by offset.
#[derive(Debug, Clone, Default)]
pub struct RenderedDocument {
    pub markup: String,
    pub split_points: Vec<SplitPoint>,
}

impl RenderedDocument {
    pub fn is_empty(&self) -> bool {
        self.markup.is_empty()
    }

    /// Markup length in chars.
    pub fn char_len(&self) -> usize {
        self.markup.chars().count()
    }
}

/// Escape text for the HTML dialect.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        push_escaped(&mut out, ch);
    }
    out
}

/// Escape text for use inside a double-quoted attribute value.
pub fn escape_attr(text: &str) -> String {
    escape_html(text).replace('"', "&quot;")
}

fn push_escaped(out: &mut String, ch: char) {
    match ch {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        c => out.push(c),
    }
}

/// Render `text` with `spans` into HTML markup.
pub fn render(text: &str, spans: &[RichSpan]) -> RenderedDocument {
    let chars: Vec<char> = text.chars().collect();
    let spans = normalize_spans(spans, &chars);

    let mut writer = MarkupWriter::default();
    let mut stack: Vec<usize> = Vec::new();
    let mut next = 0;

    for i in 0..=chars.len() {
        close_ended(&mut writer, &mut stack, &spans, i);

        while next < spans.len() && spans[next].start == i {
            writer.open(&spans[next], stack.len());
            stack.push(next);
            next += 1;
        }

        if let Some(&ch) = chars.get(i) {
            writer.text(ch, stack.len());
        }
    }

    debug_assert!(stack.is_empty());
    writer.finish()
}

/// A span clamped to the text, with its tags resolved up front.
struct PreparedSpan {
    start: usize,
    end: usize,
    open: String,
    close: &'static str,
}

fn normalize_spans(spans: &[RichSpan], chars: &[char]) -> Vec<PreparedSpan> {
    let len = chars.len();
    let mut prepared: Vec<PreparedSpan> = spans
        .iter()
        .filter_map(|span| {
            let end = span.end.min(len);
            if end <= span.start {
                debug!(start = span.start, end = span.end, len, "Dropping empty span");
                return None;
            }
            let (open, close) = tags_for(&span.kind, &chars[span.start..end]);
            Some(PreparedSpan {
                start: span.start,
                end,
                open,
                close,
            })
        })
        .collect();

    // Stable: equal spans keep their transport order.
    prepared.sort_by_key(|s| (s.start, Reverse(s.end)));
    prepared
}

fn tags_for(kind: &SpanKind, covered: &[char]) -> (String, &'static str) {
    match kind {
        SpanKind::Bold => ("<b>".into(), "</b>"),
        SpanKind::Italic => ("<i>".into(), "</i>"),
        SpanKind::Underline => ("<u>".into(), "</u>"),
        SpanKind::Strike => ("<s>".into(), "</s>"),
        SpanKind::Code => ("<code>".into(), "</code>"),
        SpanKind::Pre { language: None } => ("<pre>".into(), "</pre>"),
        SpanKind::Pre {
            language: Some(lang),
        } => (
            format!("<pre><code class=\"language-{}\">", escape_attr(lang)),
            "</code></pre>",
        ),
        SpanKind::Spoiler => ("<tg-spoiler>".into(), "</tg-spoiler>"),
        SpanKind::Quote => ("<blockquote>".into(), "</blockquote>"),
        SpanKind::Link { url } => (format!("<a href=\"{}\">", escape_attr(url)), "</a>"),
        SpanKind::Url => {
            let target: String = covered.iter().collect();
            (format!("<a href=\"{}\">", escape_attr(&target)), "</a>")
        }
        SpanKind::Mention { user_id } => (format!("<a href=\"tg://user?id={user_id}\">"), "</a>"),
    }
}

/// Close every span ending at `pos`, reopening spans that were opened after
/// it but continue past `pos`.
fn close_ended(
    writer: &mut MarkupWriter,
    stack: &mut Vec<usize>,
    spans: &[PreparedSpan],
    pos: usize,
) {
    let Some(lowest) = stack.iter().position(|&idx| spans[idx].end <= pos) else {
        return;
    };

    let popped: Vec<usize> = stack.drain(lowest..).collect();
    for &idx in popped.iter().rev() {
        writer.close(&spans[idx]);
    }

    for idx in popped {
        if spans[idx].end > pos {
            writer.open(&spans[idx], stack.len());
            stack.push(idx);
        }
    }
}

/// A text character as written into the markup.
struct WrittenChar {
    ch: char,
    /// Byte offset where its (possibly escaped) form starts.
    pos: usize,
    /// Byte offset right after it.
    next: usize,
    depth: usize,
}

#[derive(Default)]
struct MarkupWriter {
    markup: String,
    written: Vec<WrittenChar>,
    tag_cuts: Vec<usize>,
}

impl MarkupWriter {
    fn open(&mut self, span: &PreparedSpan, depth: usize) {
        if depth == 0 && !self.markup.is_empty() {
            self.tag_cuts.push(self.markup.len());
        }
        self.markup.push_str(&span.open);
    }

    fn close(&mut self, span: &PreparedSpan) {
        self.markup.push_str(span.close);
    }

    fn text(&mut self, ch: char, depth: usize) {
        let pos = self.markup.len();
        push_escaped(&mut self.markup, ch);
        self.written.push(WrittenChar {
            ch,
            pos,
            next: self.markup.len(),
            depth,
        });
    }

    fn finish(self) -> RenderedDocument {
        let mut points: Vec<SplitPoint> = Vec::new();

        for &offset in &self.tag_cuts {
            points.push(SplitPoint {
                offset,
                resume: offset,
                kind: BoundaryKind::Char,
            });
        }

        for w in self.written.iter().filter(|w| w.pos > 0) {
            points.push(SplitPoint {
                offset: w.pos,
                resume: w.pos,
                kind: if w.depth == 0 {
                    BoundaryKind::Char
                } else {
                    BoundaryKind::NestedChar
                },
            });
        }

        points.extend(whitespace_points(&self.written));

        points.sort_by_key(|p| (p.offset, p.kind));
        points.dedup();

        RenderedDocument {
            markup: self.markup,
            split_points: points,
        }
    }
}

fn is_sentence_end(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '…')
}

/// Soft split points: runs of top-level whitespace that are contiguous in
/// the markup.
fn whitespace_points(written: &[WrittenChar]) -> Vec<SplitPoint> {
    let mut points = Vec::new();
    let mut i = 0;

    while i < written.len() {
        let w = &written[i];
        if w.depth != 0 || !w.ch.is_whitespace() {
            i += 1;
            continue;
        }

        let mut j = i;
        while j + 1 < written.len()
            && written[j + 1].depth == 0
            && written[j + 1].ch.is_whitespace()
            && written[j + 1].pos == written[j].next
        {
            j += 1;
        }

        let run = &written[i..=j];
        let newlines = run.iter().filter(|w| w.ch == '\n').count();
        let kind = if newlines >= 2 {
            BoundaryKind::Paragraph
        } else if newlines == 1 {
            BoundaryKind::Line
        } else if i > 0 && is_sentence_end(written[i - 1].ch) {
            BoundaryKind::Sentence
        } else {
            BoundaryKind::Whitespace
        };

        if run[0].pos > 0 {
            points.push(SplitPoint {
                offset: run[0].pos,
                resume: run[run.len() - 1].next,
                kind,
            });
        }
        i = j + 1;
    }

    points
}

/// Opening tags still open at byte `offset` of rendered markup, outermost
/// first. `offset` must not fall inside a tag.
pub fn open_tags_at(markup: &str, offset: usize) -> Vec<&str> {
    let mut stack: Vec<&str> = Vec::new();
    let mut pos = 0;
    while pos < offset {
        let Some(found) = markup[pos..offset].find('<') else {
            break;
        };
        let start = pos + found;
        let Some(len) = markup[start..].find('>') else {
            break;
        };
        let tag = &markup[start..=start + len];
        if tag.starts_with("</") {
            stack.pop();
        } else {
            stack.push(tag);
        }
        pos = start + len + 1;
    }
    stack
}

/// Closing counterpart of an opening tag: `<a href="x">` → `</a>`.
pub fn closing_tag(open: &str) -> String {
    let name = open
        .trim_start_matches('<')
        .trim_end_matches('>')
        .split_whitespace()
        .next()
        .unwrap_or_default();
    format!("</{name}>")
}

#[cfg(test)]
/// Scan markup with a bracket-matching stack; returns false on any
/// mismatch or leftover open tag.
pub(crate) fn tags_balanced(markup: &str) -> bool {
    let mut stack: Vec<String> = Vec::new();
    let mut rest = markup;
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            return false;
        };
        let tag = &rest[start + 1..start + len];
        rest = &rest[start + len + 1..];
        if let Some(name) = tag.strip_prefix('/') {
            if stack.pop().as_deref() != Some(name) {
                return false;
            }
        } else {
            let name = tag.split_whitespace().next().unwrap_or_default();
            stack.push(name.to_string());
        }
    }
    stack.is_empty()
}
