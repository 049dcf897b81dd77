//! Telegram feed transport — long-polls the Bot API for channel posts.
//!
//! The bot must be an administrator of every source channel (to receive
//! `channel_post` updates) and of both destination channels (to post).
//!
//! The Bot API cannot fetch an arbitrary past message, so `lookup` is served
//! from a bounded cache of recently received posts. Every post of one
//! `getUpdates` batch is cached before any of them is handed to the relay, so
//! album siblings delivered together are always visible to each other.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::channels::telegram_types::{ApiResponse, Chat, Message, Update};
use crate::channels::{FeedTransport, ItemStream};
use crate::error::ChannelError;
use crate::pipeline::types::{
    Attachment, AttachmentKind, ContentItem, Delivery, Destination, Identity, MessageHandle,
};

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Recent posts kept for sibling lookups.
const RECENT_POSTS_CAPACITY: usize = 2000;

/// Longest flood-control wait honoured before a send is retried once.
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Bounded cache of recently received posts, keyed by (chat id, message id).
#[derive(Debug, Default)]
struct RecentPosts {
    order: VecDeque<(i64, i64)>,
    items: HashMap<(i64, i64), ContentItem>,
}

impl RecentPosts {
    fn insert(&mut self, item: ContentItem) {
        let key = (item.feed_id(), item.id);
        if self.items.insert(key, item).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > RECENT_POSTS_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.items.remove(&old);
            }
        }
    }

    fn get(&self, feed_id: i64, id: i64) -> Option<ContentItem> {
        self.items.get(&(feed_id, id)).cloned()
    }
}

/// Telegram transport settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Numeric chat id or `@username`.
    pub primary_chat: String,
    pub secondary_chat: String,
    /// Accepted source chats. Empty accepts every channel except the
    /// destinations.
    pub source_chats: Vec<i64>,
}

/// Bot API transport using long-polling.
pub struct TelegramTransport {
    config: TelegramConfig,
    client: reqwest::Client,
    recent: Arc<Mutex<RecentPosts>>,
    identities: Mutex<HashMap<i64, Identity>>,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            recent: Arc::new(Mutex::new(RecentPosts::default())),
            identities: Mutex::new(HashMap::new()),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.config.bot_token, method)
    }

    fn chat_for(&self, destination: Destination) -> &str {
        match destination {
            Destination::Primary => &self.config.primary_chat,
            Destination::Secondary => &self.config.secondary_chat,
        }
    }

    /// Call a Bot API method, retrying once after a short flood-control wait.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, ChannelError> {
        match self.call_once(method, body).await? {
            Ok(result) => Ok(result),
            Err(ApiFailure {
                retry_after: Some(secs),
                ..
            }) if secs <= MAX_RETRY_AFTER_SECS => {
                tracing::warn!(method, retry_after = secs, "Telegram flood control, retrying once");
                tokio::time::sleep(Duration::from_secs(secs)).await;
                self.call_once(method, body)
                    .await?
                    .map_err(|failure| failure.into_error(method))
            }
            Err(failure) => Err(failure.into_error(method)),
        }
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<Result<T, ApiFailure>, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let data: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidMessage(format!("{method}: {e}")))?;

        match (data.ok, data.result) {
            (true, Some(result)) => Ok(Ok(result)),
            _ => Ok(Err(ApiFailure {
                description: data
                    .description
                    .unwrap_or_else(|| "no description".into()),
                error_code: data.error_code,
                retry_after: data.parameters.and_then(|p| p.retry_after),
            })),
        }
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<MessageHandle, ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        let message: Message = self.call("sendMessage", &body).await?;
        Ok(MessageHandle(message.message_id.to_string()))
    }

    async fn send_single(
        &self,
        chat_id: &str,
        attachment: &Attachment,
        caption: Option<&str>,
    ) -> Result<MessageHandle, ChannelError> {
        let (method, field) = send_method(attachment.kind);
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            field: attachment.file_ref,
        });
        if let Some(cap) = caption {
            body["caption"] = serde_json::Value::String(cap.to_string());
            body["parse_mode"] = serde_json::Value::String("HTML".into());
        }
        let message: Message = self.call(method, &body).await?;
        Ok(MessageHandle(message.message_id.to_string()))
    }

    async fn send_media_group(
        &self,
        chat_id: &str,
        attachments: &[Attachment],
        caption: Option<&str>,
    ) -> Result<MessageHandle, ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "media": media_group(attachments, caption),
        });
        let messages: Vec<Message> = self.call("sendMediaGroup", &body).await?;
        let first = messages.first().map(|m| m.message_id).unwrap_or_default();
        Ok(MessageHandle(first.to_string()))
    }

    async fn send_album(
        &self,
        chat_id: &str,
        attachments: &[Attachment],
        caption: Option<&str>,
    ) -> Result<MessageHandle, ChannelError> {
        match attachments {
            [] => match caption {
                Some(text) => self.send_text(chat_id, text).await,
                None => Err(ChannelError::InvalidMessage("empty album".into())),
            },
            [single] => self.send_single(chat_id, single, caption).await,
            many if album_compatible(many) => self.send_media_group(chat_id, many, caption).await,
            many => {
                // Mixed kinds cannot share a media group; send one by one with
                // the caption on the first.
                tracing::debug!(count = many.len(), "Mixed album, sending items separately");
                let mut caption = caption;
                let mut first = None;
                for attachment in many {
                    let handle = self.send_single(chat_id, attachment, caption.take()).await?;
                    first.get_or_insert(handle);
                }
                first.ok_or_else(|| ChannelError::InvalidMessage("empty album".into()))
            }
        }
    }
}

/// A Bot API call that returned `ok: false`.
#[derive(Debug)]
struct ApiFailure {
    description: String,
    error_code: Option<i64>,
    retry_after: Option<u64>,
}

impl ApiFailure {
    fn into_error(self, method: &str) -> ChannelError {
        ChannelError::SendFailed {
            name: "telegram".into(),
            reason: format!(
                "{method} failed ({}): {}",
                self.error_code.map(|c| c.to_string()).unwrap_or_else(|| "?".into()),
                self.description
            ),
        }
    }
}

// ── FeedTransport implementation ────────────────────────────────────

#[async_trait]
impl FeedTransport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn subscribe(&self) -> Result<ItemStream, ChannelError> {
        // Fail fast on a bad token.
        let me: serde_json::Value = self
            .call("getMe", &serde_json::json!({}))
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;
        tracing::info!(
            bot = me.get("username").and_then(serde_json::Value::as_str).unwrap_or("?"),
            "Telegram transport connected"
        );

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();
        let recent = Arc::clone(&self.recent);
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            tracing::info!("Telegram transport listening for channel posts...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["channel_post"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let data: ApiResponse<Vec<Update>> = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                if !data.ok {
                    tracing::warn!(
                        description = data.description.as_deref().unwrap_or("?"),
                        "Telegram getUpdates rejected"
                    );
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }

                let updates = data.result.unwrap_or_default();
                if let Some(last) = updates.last() {
                    offset = last.update_id + 1;
                }

                let items: Vec<ContentItem> = updates
                    .into_iter()
                    .filter_map(|update| update.channel_post)
                    .filter(|post| is_source_chat(&config, &post.chat))
                    .map(Message::into_item)
                    .collect();

                if let Ok(mut cache) = recent.lock() {
                    for item in &items {
                        cache.insert(item.clone());
                    }
                }

                for item in items {
                    tracing::debug!(id = item.id, feed_id = item.feed_id(), "Channel post received");
                    if tx.send(item).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn lookup(&self, feed_id: i64, id: i64) -> Result<Option<ContentItem>, ChannelError> {
        self.recent
            .lock()
            .map(|cache| cache.get(feed_id, id))
            .map_err(|_| ChannelError::LookupFailed {
                name: "telegram".into(),
                what: format!("post {id} in {feed_id}"),
                reason: "post cache poisoned".into(),
            })
    }

    async fn resolve_identity(&self, feed_id: i64) -> Result<Identity, ChannelError> {
        if let Some(identity) = self
            .identities
            .lock()
            .ok()
            .and_then(|cache| cache.get(&feed_id).cloned())
        {
            return Ok(identity);
        }

        let chat: Chat = self
            .call("getChat", &serde_json::json!({ "chat_id": feed_id }))
            .await
            .map_err(|e| ChannelError::LookupFailed {
                name: "telegram".into(),
                what: format!("chat {feed_id}"),
                reason: e.to_string(),
            })?;

        let identity = chat.identity();
        if let Ok(mut cache) = self.identities.lock() {
            cache.insert(feed_id, identity.clone());
        }
        Ok(identity)
    }

    async fn deliver(
        &self,
        destination: Destination,
        delivery: Delivery,
    ) -> Result<MessageHandle, ChannelError> {
        let chat_id = self.chat_for(destination).to_string();
        let kind = delivery.label();
        let handle = match delivery {
            Delivery::Text(text) => self.send_text(&chat_id, &text).await?,
            Delivery::Album {
                attachments,
                caption,
            } => {
                self.send_album(&chat_id, &attachments, caption.as_deref())
                    .await?
            }
        };
        tracing::debug!(destination = %destination, kind, message_id = %handle.0, "Delivered");
        Ok(handle)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(token: &SecretString, method: &str) -> String {
    format!(
        "https://api.telegram.org/bot{}/{method}",
        token.expose_secret()
    )
}

/// Source filter: an explicit allowlist when configured, otherwise every
/// channel that is not one of the destinations.
fn is_source_chat(config: &TelegramConfig, chat: &Chat) -> bool {
    if chat.kind != "channel" {
        return false;
    }
    if !config.source_chats.is_empty() {
        return config.source_chats.contains(&chat.id);
    }
    let is_destination = |target: &str| {
        target == chat.id.to_string()
            || chat
                .username
                .as_deref()
                .is_some_and(|u| target.trim_start_matches('@').eq_ignore_ascii_case(u))
    };
    !is_destination(&config.primary_chat) && !is_destination(&config.secondary_chat)
}

/// Bot API method and field name for a single attachment.
fn send_method(kind: AttachmentKind) -> (&'static str, &'static str) {
    match kind {
        AttachmentKind::Photo => ("sendPhoto", "photo"),
        AttachmentKind::Video => ("sendVideo", "video"),
        AttachmentKind::Animation => ("sendAnimation", "animation"),
        AttachmentKind::Document => ("sendDocument", "document"),
        AttachmentKind::Audio => ("sendAudio", "audio"),
    }
}

/// Whether attachments can share one media group: photos and videos mix,
/// documents and audio only group with their own kind, animations never
/// group.
fn album_compatible(attachments: &[Attachment]) -> bool {
    let visual = |k: AttachmentKind| matches!(k, AttachmentKind::Photo | AttachmentKind::Video);
    let kinds: Vec<AttachmentKind> = attachments.iter().map(|a| a.kind).collect();
    kinds.iter().all(|k| visual(*k))
        || kinds.iter().all(|k| *k == AttachmentKind::Document)
        || kinds.iter().all(|k| *k == AttachmentKind::Audio)
}

/// `media` array for `sendMediaGroup`, caption on the first item.
fn media_group(attachments: &[Attachment], caption: Option<&str>) -> serde_json::Value {
    let media: Vec<serde_json::Value> = attachments
        .iter()
        .enumerate()
        .map(|(i, attachment)| {
            let mut entry = serde_json::json!({
                "type": attachment.kind.label(),
                "media": attachment.file_ref,
            });
            if let (0, Some(cap)) = (i, caption) {
                entry["caption"] = serde_json::Value::String(cap.to_string());
                entry["parse_mode"] = serde_json::Value::String("HTML".into());
            }
            entry
        })
        .collect();
    serde_json::Value::Array(media)
}

// ── Tests ───────────────────────────────────────────────────────────
