//! End-to-end relay tests: an in-memory transport feeds a stream of posts
//! through rules, the backend ensemble, assembly, rendering and dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use feed_relay::channels::{FeedTransport, ItemStream};
use feed_relay::classifier::{EnsembleClassifier, RetryPolicy, registry};
use feed_relay::diagnostics::MemorySink;
use feed_relay::error::{ChannelError, LlmError};
use feed_relay::llm::JudgmentBackend;
use feed_relay::pipeline::types::{
    Attachment, AttachmentKind, ContentItem, Delivery, Destination, Identity, MessageHandle,
    RichSpan, SpanKind,
};
use feed_relay::pipeline::{
    ChunkBudget, Chunker, ContentAssembler, RelayProcessor, Router, RulesEngine,
};
use feed_relay::stopwords::StaticStopWords;

const SOURCE: i64 = -1001;
const PARTNER: i64 = -1777;

/// Calls everything with a casino in it an ad.
struct KeywordJudge(&'static str);

#[async_trait]
impl JudgmentBackend for KeywordJudge {
    fn name(&self) -> &str {
        self.0
    }

    async fn call(&self, prompt: &str) -> Result<String, LlmError> {
        if prompt.contains("казино") {
            Ok("Реклама.".into())
        } else {
            Ok("Полезно".into())
        }
    }
}

struct DeadJudge;

#[async_trait]
impl JudgmentBackend for DeadJudge {
    fn name(&self) -> &str {
        "dead"
    }

    async fn call(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::RequestFailed {
            provider: "dead".into(),
            reason: "connection refused".into(),
        })
    }
}

/// Serves a fixed post history and records every delivery.
struct MemoryTransport {
    posts: Vec<ContentItem>,
    sent: Mutex<Vec<(Destination, Delivery)>>,
}

impl MemoryTransport {
    fn new(posts: Vec<ContentItem>) -> Self {
        Self {
            posts,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<(Destination, Delivery)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedTransport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn subscribe(&self) -> Result<ItemStream, ChannelError> {
        Ok(Box::pin(futures::stream::iter(self.posts.clone())))
    }

    async fn lookup(&self, feed_id: i64, id: i64) -> Result<Option<ContentItem>, ChannelError> {
        Ok(self
            .posts
            .iter()
            .find(|p| p.feed_id() == feed_id && p.id == id)
            .cloned())
    }

    async fn resolve_identity(&self, feed_id: i64) -> Result<Identity, ChannelError> {
        let names: HashMap<i64, (&str, &str)> = HashMap::from([
            (SOURCE, ("Arb Cases", "arb_cases")),
            (PARTNER, ("Partner News", "partner_news")),
        ]);
        names
            .get(&feed_id)
            .map(|(name, handle)| Identity {
                display_name: name.to_string(),
                handle: Some(handle.to_string()),
            })
            .ok_or_else(|| ChannelError::LookupFailed {
                name: "memory".into(),
                what: format!("chat {feed_id}"),
                reason: "unknown".into(),
            })
    }

    async fn deliver(
        &self,
        destination: Destination,
        delivery: Delivery,
    ) -> Result<MessageHandle, ChannelError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((destination, delivery));
        Ok(MessageHandle(sent.len().to_string()))
    }
}

fn relay(transport: Arc<MemoryTransport>, sink: Arc<MemorySink>) -> RelayProcessor {
    let backends: Vec<Arc<dyn JudgmentBackend>> = vec![
        Arc::new(KeywordJudge("alpha")),
        Arc::new(KeywordJudge("beta")),
        Arc::new(DeadJudge),
    ];
    let classifier = EnsembleClassifier::new(registry(backends), sink).with_retry(RetryPolicy {
        backoff: std::time::Duration::from_secs(1),
        max_rounds: Some(1),
    });
    RelayProcessor::new(
        transport.clone(),
        Arc::new(classifier),
        RulesEngine::new(Arc::new(StaticStopWords::new(["розыгрыш"]))),
        ContentAssembler::new(transport, 10),
        Chunker::new(ChunkBudget::default()),
        Router::new().with_override(PARTNER, Destination::Primary),
    )
}

fn source_link() -> &'static str {
    "\n\nИсточник: <a href=\"https://t.me/arb_cases\">Arb Cases</a>"
}

#[tokio::test]
async fn stream_is_relayed_end_to_end() {
    let photo = |id: &str| vec![Attachment::new(AttachmentKind::Photo, id)];
    let posts = vec![
        ContentItem::new(SOURCE, 20, "Кейс недели: ROI 140%")
            .with_spans(vec![RichSpan::new(0, 11, SpanKind::Bold)])
            .with_group_key("album-1")
            .with_attachments(photo("p20")),
        ContentItem::new(SOURCE, 21, "")
            .with_group_key("album-1")
            .with_attachments(photo("p21")),
        ContentItem::new(SOURCE, 30, "Лучшее казино, бонус 500%"),
        ContentItem::new(SOURCE, 31, "Розыгрыш айфона среди подписчиков"),
        ContentItem::new(PARTNER, 5, "Новость & анонс"),
    ];

    let transport = Arc::new(MemoryTransport::new(posts));
    let sink = Arc::new(MemorySink::new());
    let processor = relay(transport.clone(), sink.clone());

    let stream = transport.subscribe().await.unwrap();
    processor.run(stream).await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 3, "unexpected deliveries: {sent:#?}");

    // Album: both photos, caption carries the text and the source link.
    assert_eq!(sent[0].0, Destination::Primary);
    assert_eq!(
        sent[0].1,
        Delivery::Album {
            attachments: vec![
                Attachment::new(AttachmentKind::Photo, "p20"),
                Attachment::new(AttachmentKind::Photo, "p21"),
            ],
            caption: Some(format!("<b>Кейс недели</b>: ROI 140%{}", source_link())),
        }
    );

    // Ad: two ad votes, the dead backend is left out of the tally.
    assert_eq!(sent[1].0, Destination::Secondary);
    assert_eq!(
        sent[1].1,
        Delivery::Text(format!("Лучшее казино, бонус 500%{}", source_link()))
    );

    // Partner feed bypasses classification and keeps its own attribution.
    assert_eq!(sent[2].0, Destination::Primary);
    assert_eq!(
        sent[2].1,
        Delivery::Text(
            "Новость &amp; анонс\n\nИсточник: <a href=\"https://t.me/partner_news\">Partner News</a>"
                .into()
        )
    );

    // Two classified posts, each with one summary line and one failed vote.
    let lines = sink.lines();
    assert_eq!(lines.iter().filter(|l| l.starts_with("📊")).count(), 2);
    assert_eq!(lines.iter().filter(|l| l.contains("❌ dead")).count(), 2);
}

#[tokio::test]
async fn long_post_is_split_across_messages() {
    let paragraph = "Связка работает стабильно. ".repeat(100);
    let text = format!("{paragraph}\n\n{paragraph}");
    let transport = Arc::new(MemoryTransport::new(vec![ContentItem::new(SOURCE, 40, &text)]));
    let processor = relay(transport.clone(), Arc::new(MemorySink::new()));

    processor.run(transport.subscribe().await.unwrap()).await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    for (destination, delivery) in &sent {
        assert_eq!(*destination, Destination::Primary);
        match delivery {
            Delivery::Text(body) => assert!(body.chars().count() <= 4096),
            other => panic!("expected text, got {other:?}"),
        }
    }
    match &sent[1].1 {
        Delivery::Text(body) => assert!(body.ends_with(source_link())),
        other => panic!("expected text, got {other:?}"),
    }
}
