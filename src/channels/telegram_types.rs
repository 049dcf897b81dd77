//! Telegram Bot API wire types and their conversion into content items.
//!
//! Only the fields the relay uses are modelled. Entity offsets in the Bot API
//! are UTF-16 code units; they are converted to char offsets here so nothing
//! past the transport boundary sees UTF-16.

use chrono::{TimeZone, Utc};
use serde::Deserialize;

use crate::pipeline::types::{
    Attachment, AttachmentKind, ContentItem, Identity, ProvenanceDescriptor, RichSpan, SpanKind,
    UnsupportedKind,
};

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    /// Seconds to wait before retrying after a flood-control error.
    pub retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub channel_post: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
}

impl Chat {
    pub fn identity(&self) -> Identity {
        Identity {
            display_name: self
                .title
                .clone()
                .or_else(|| self.username.clone())
                .unwrap_or_else(|| self.id.to_string()),
            handle: self.username.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    /// UTF-16 code units.
    pub offset: usize,
    /// UTF-16 code units.
    pub length: usize,
    pub url: Option<String>,
    pub user: Option<User>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

/// Origin of a forwarded message (Bot API 7.0+).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageOrigin {
    Channel { chat: Chat },
    Chat { sender_chat: Chat },
    /// Users and hidden users.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    /// Unix timestamp.
    pub date: i64,
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    pub caption: Option<String>,
    #[serde(default)]
    pub caption_entities: Vec<MessageEntity>,
    pub media_group_id: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
    pub video: Option<FileRef>,
    pub animation: Option<FileRef>,
    pub document: Option<FileRef>,
    pub audio: Option<FileRef>,
    pub voice: Option<serde_json::Value>,
    pub video_note: Option<serde_json::Value>,
    pub poll: Option<serde_json::Value>,
    pub forward_origin: Option<MessageOrigin>,
    /// Pre-7.0 forward field, still sent by some servers.
    pub forward_from_chat: Option<Chat>,
}

impl Message {
    /// Chat the content was originally published in, for forwarded posts.
    pub fn forwarded_from(&self) -> Option<i64> {
        match &self.forward_origin {
            Some(MessageOrigin::Channel { chat }) => Some(chat.id),
            Some(MessageOrigin::Chat { sender_chat }) => Some(sender_chat.id),
            Some(MessageOrigin::Other) => None,
            None => self.forward_from_chat.as_ref().map(|chat| chat.id),
        }
    }

    fn attachments(&self) -> Vec<Attachment> {
        let mut attachments = Vec::new();
        if let Some(largest) = self
            .photo
            .as_ref()
            .and_then(|sizes| sizes.iter().max_by_key(|p| p.width * p.height))
        {
            attachments.push(Attachment::new(AttachmentKind::Photo, &largest.file_id));
        }
        if let Some(video) = &self.video {
            attachments.push(Attachment::new(AttachmentKind::Video, &video.file_id));
        }
        // Animations also carry a `document` field describing the same file.
        if let Some(animation) = &self.animation {
            attachments.push(Attachment::new(AttachmentKind::Animation, &animation.file_id));
        } else if let Some(document) = &self.document {
            attachments.push(Attachment::new(AttachmentKind::Document, &document.file_id));
        }
        if let Some(audio) = &self.audio {
            attachments.push(Attachment::new(AttachmentKind::Audio, &audio.file_id));
        }
        attachments
    }

    fn unsupported(&self) -> Option<UnsupportedKind> {
        if self.poll.is_some() {
            Some(UnsupportedKind::Poll)
        } else if self.voice.is_some() {
            Some(UnsupportedKind::Voice)
        } else if self.video_note.is_some() {
            Some(UnsupportedKind::VideoNote)
        } else {
            None
        }
    }

    /// Convert into the transport-neutral item.
    pub fn into_item(self) -> ContentItem {
        let (text, entities) = match (&self.text, &self.caption) {
            (Some(text), _) => (text.clone(), &self.entities),
            (None, Some(caption)) => (caption.clone(), &self.caption_entities),
            (None, None) => (String::new(), &self.entities),
        };
        let spans = convert_entities(&text, entities);

        ContentItem {
            id: self.message_id,
            spans,
            attachments: self.attachments(),
            group_key: self.media_group_id.clone(),
            provenance: ProvenanceDescriptor {
                feed_id: self.chat.id,
                forwarded_from: self.forwarded_from(),
            },
            unsupported: self.unsupported(),
            posted_at: Utc
                .timestamp_opt(self.date, 0)
                .single()
                .unwrap_or_else(Utc::now),
            text,
        }
    }
}

/// Map Bot API entities to spans with char offsets. Entity kinds without a
/// markup counterpart (hashtags, @mentions, commands) are skipped.
pub fn convert_entities(text: &str, entities: &[MessageEntity]) -> Vec<RichSpan> {
    if entities.is_empty() {
        return Vec::new();
    }
    let index = Utf16Index::new(text);
    entities
        .iter()
        .filter_map(|entity| {
            let kind = span_kind(entity)?;
            let start = index.char_offset(entity.offset);
            let end = index.char_offset(entity.offset + entity.length);
            (end > start).then(|| RichSpan::new(start, end, kind))
        })
        .collect()
}

fn span_kind(entity: &MessageEntity) -> Option<SpanKind> {
    Some(match entity.kind.as_str() {
        "bold" => SpanKind::Bold,
        "italic" => SpanKind::Italic,
        "underline" => SpanKind::Underline,
        "strikethrough" => SpanKind::Strike,
        "code" => SpanKind::Code,
        "pre" => SpanKind::Pre {
            language: entity.language.clone(),
        },
        "spoiler" => SpanKind::Spoiler,
        "blockquote" | "expandable_blockquote" => SpanKind::Quote,
        "text_link" => SpanKind::Link {
            url: entity.url.clone()?,
        },
        "url" => SpanKind::Url,
        "text_mention" => SpanKind::Mention {
            user_id: entity.user.as_ref()?.id,
        },
        _ => return None,
    })
}

/// UTF-16 offset of every char boundary in a string.
struct Utf16Index {
    /// `boundaries[k]` is the UTF-16 offset of char `k`; the last entry is
    /// the total UTF-16 length.
    boundaries: Vec<usize>,
}

impl Utf16Index {
    fn new(text: &str) -> Self {
        let mut boundaries = Vec::with_capacity(text.len() + 1);
        let mut pos = 0;
        for ch in text.chars() {
            boundaries.push(pos);
            pos += ch.len_utf16();
        }
        boundaries.push(pos);
        Self { boundaries }
    }

    /// Char offset for a UTF-16 offset. Offsets inside a surrogate pair round
    /// up to the next char; offsets past the end clamp to the char count.
    fn char_offset(&self, utf16: usize) -> usize {
        self.boundaries
            .partition_point(|&b| b < utf16)
            .min(self.boundaries.len() - 1)
    }
}
