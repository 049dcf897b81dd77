//! Shared types for the relay pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Content item ────────────────────────────────────────────────────

/// One inbound post from a source feed.
///
/// Transports convert their native format into this struct. Span offsets are
/// char (Unicode scalar) offsets into `text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// Post id within its feed. Also the ordering key.
    pub id: i64,
    /// Raw text (message text or media caption).
    pub text: String,
    /// Rich-text spans over `text`, in transport order.
    pub spans: Vec<RichSpan>,
    /// Attachments in transport order.
    pub attachments: Vec<Attachment>,
    /// Album/group key shared by the parts of one logical post.
    pub group_key: Option<String>,
    /// Where the post came from.
    pub provenance: ProvenanceDescriptor,
    /// Content that the relay never republishes.
    #[serde(default)]
    pub unsupported: Option<UnsupportedKind>,
    /// When the post was published.
    pub posted_at: DateTime<Utc>,
}

impl ContentItem {
    /// Create a plain-text item hosted in `feed_id`.
    pub fn new(feed_id: i64, id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            spans: Vec::new(),
            attachments: Vec::new(),
            group_key: None,
            provenance: ProvenanceDescriptor {
                feed_id,
                forwarded_from: None,
            },
            unsupported: None,
            posted_at: Utc::now(),
        }
    }

    pub fn with_spans(mut self, spans: Vec<RichSpan>) -> Self {
        self.spans = spans;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_group_key(mut self, key: impl Into<String>) -> Self {
        self.group_key = Some(key.into());
        self
    }

    pub fn forwarded_from(mut self, feed_id: i64) -> Self {
        self.provenance.forwarded_from = Some(feed_id);
        self
    }

    /// Feed that hosts this item.
    pub fn feed_id(&self) -> i64 {
        self.provenance.feed_id
    }

    /// Whether the item has any non-whitespace text.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Seconds between publication and `now`, never negative.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.posted_at).num_seconds().max(0)
    }
}

/// Content kinds that are filtered out before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedKind {
    Poll,
    Voice,
    VideoNote,
}

impl UnsupportedKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Voice => "voice",
            Self::VideoNote => "video_note",
        }
    }
}

/// Origin of an item: the hosting feed and, for forwarded copies, the
/// feed the content was originally published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceDescriptor {
    pub feed_id: i64,
    pub forwarded_from: Option<i64>,
}

impl ProvenanceDescriptor {
    /// Feed whose identity is shown next to republished content.
    pub fn origin_feed(&self) -> i64 {
        self.forwarded_from.unwrap_or(self.feed_id)
    }
}

// ── Rich text ───────────────────────────────────────────────────────

/// Offset-based formatting span. `end` is exclusive and greater than `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichSpan {
    pub start: usize,
    pub end: usize,
    pub kind: SpanKind,
}

impl RichSpan {
    pub fn new(start: usize, end: usize, kind: SpanKind) -> Self {
        Self { start, end, kind }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Shift both offsets right by `by`.
    pub fn shifted(&self, by: usize) -> Self {
        Self {
            start: self.start + by,
            end: self.end + by,
            kind: self.kind.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpanKind {
    Bold,
    Italic,
    Underline,
    Strike,
    Code,
    Pre { language: Option<String> },
    Spoiler,
    Quote,
    /// Text link with an explicit target.
    Link { url: String },
    /// Bare URL detected in the text; the covered slice is the target.
    Url,
    /// Mention of a user without a public handle.
    Mention { user_id: i64 },
}

// ── Attachments ─────────────────────────────────────────────────────

/// Reference to media that can be re-sent without downloading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// Transport-native reference (Telegram `file_id`).
    pub file_ref: String,
}

impl Attachment {
    pub fn new(kind: AttachmentKind, file_ref: impl Into<String>) -> Self {
        Self {
            kind,
            file_ref: file_ref.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Photo,
    Video,
    Animation,
    Document,
    Audio,
}

impl AttachmentKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Animation => "animation",
            Self::Document => "document",
            Self::Audio => "audio",
        }
    }
}

// ── Provenance ──────────────────────────────────────────────────────

/// Public identity of a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub display_name: String,
    /// Public handle without a leading `@`.
    pub handle: Option<String>,
}

/// Resolved source identity shown alongside republished content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    Resolved { feed_id: i64, identity: Identity },
    /// Identity lookup failed; only an opaque description is known.
    Opaque(String),
}

impl Provenance {
    /// Fallback used when the identity of `feed_id` cannot be resolved.
    pub fn opaque(feed_id: i64) -> Self {
        Self::Opaque(format!("channel {feed_id}"))
    }

    /// Short plain-text label for logging.
    pub fn label(&self) -> String {
        match self {
            Self::Resolved { identity, .. } => match &identity.handle {
                Some(handle) => format!("@{handle}"),
                None => identity.display_name.clone(),
            },
            Self::Opaque(text) => text.clone(),
        }
    }
}

// ── Assembled post ──────────────────────────────────────────────────

/// One logical post after its parts have been merged.
#[derive(Debug, Clone)]
pub struct AssembledPost {
    /// Ids of the merged items, ascending.
    pub item_ids: Vec<i64>,
    pub text: String,
    pub spans: Vec<RichSpan>,
    pub attachments: Vec<Attachment>,
    pub provenance: Provenance,
}

// ── Segments ────────────────────────────────────────────────────────

/// Size-bounded slice of a rendered document, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Markup to send, including the provenance suffix on the last segment.
    pub body: String,
    /// Byte range of the document this segment was cut from. Empty for a
    /// suffix-only segment.
    pub source: std::ops::Range<usize>,
    /// Attachments sent together with this segment.
    pub attachments: Vec<Attachment>,
    /// True only for the first segment when the post has attachments.
    pub caption: bool,
}

impl Segment {
    /// Body length in chars, the unit the destination limits are expressed in.
    pub fn char_len(&self) -> usize {
        self.body.chars().count()
    }
}

// ── Routing ─────────────────────────────────────────────────────────

/// Where a post is republished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Primary,
    Secondary,
}

impl Destination {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" | "good" => Ok(Self::Primary),
            "secondary" | "trash" => Ok(Self::Secondary),
            other => Err(format!("unknown destination '{other}'")),
        }
    }
}

/// One outbound send in the HTML markup dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Text(String),
    Album {
        attachments: Vec<Attachment>,
        caption: Option<String>,
    },
}

impl Delivery {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Album { .. } => "album",
        }
    }
}

/// Transport-native id of a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle(pub String);
