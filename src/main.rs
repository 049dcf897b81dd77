use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::prelude::*;

use feed_relay::channels::{FeedTransport, TelegramConfig, TelegramTransport};
use feed_relay::classifier::probe::DEFAULT_PROBE_CONCURRENCY;
use feed_relay::classifier::{EnsembleClassifier, probe_backends, registry};
use feed_relay::config::RelayConfig;
use feed_relay::diagnostics::{DiagnosticSink, FanoutSink, FeedSink, TracingSink};
use feed_relay::llm::{create_backends, load_backend_specs};
use feed_relay::pipeline::types::Destination;
use feed_relay::pipeline::{Chunker, ContentAssembler, RelayProcessor, Router, RulesEngine};
use feed_relay::stopwords::StopWordFile;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the real environment still applies.
    let _ = dotenvy::dotenv();

    let config = RelayConfig::from_env().context("loading configuration")?;

    // Initialize tracing, plus a daily rolling file when a log dir is set.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "feed-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    let specs = load_backend_specs(&config.backends_file)
        .with_context(|| format!("reading {}", config.backends_file.display()))?;
    let backends = create_backends(&specs);

    if std::env::args().nth(1).as_deref() == Some("probe") {
        return probe(&backends, &config).await;
    }

    eprintln!("📡 Feed Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backends: {}", backends.len());
    eprintln!("   Primary: {}", config.primary_chat);
    eprintln!("   Secondary: {}", config.secondary_chat);
    eprintln!(
        "   Sources: {}",
        if config.source_chats.is_empty() {
            "every channel".to_string()
        } else {
            config
                .source_chats
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }
    );
    eprintln!("   Stop words: {}\n", config.stopwords_file.display());

    if backends.is_empty() {
        tracing::warn!("No judgment backends configured, every classified post will fail");
    }

    // ── Transport ───────────────────────────────────────────────────────
    let transport: Arc<dyn FeedTransport> = Arc::new(TelegramTransport::new(TelegramConfig {
        bot_token: config.bot_token.clone(),
        primary_chat: config.primary_chat.clone(),
        secondary_chat: config.secondary_chat.clone(),
        source_chats: config.source_chats.clone(),
    }));

    // ── Diagnostics ─────────────────────────────────────────────────────
    let mut sinks = FanoutSink::new(vec![Arc::new(TracingSink) as Arc<dyn DiagnosticSink>]);
    if config.diagnostics_to_feed {
        sinks.push(Arc::new(FeedSink::new(
            Arc::clone(&transport),
            Destination::Secondary,
        )));
    }

    // ── Pipeline ────────────────────────────────────────────────────────
    let classifier = Arc::new(
        EnsembleClassifier::new(registry(backends), Arc::new(sinks))
            .with_labels(config.labels.clone())
            .with_call_timeout(config.backend_timeout)
            .with_retry(config.retry),
    );
    let rules = RulesEngine::new(Arc::new(StopWordFile::new(config.stopwords_file.clone())));
    let assembler = ContentAssembler::new(Arc::clone(&transport), config.group_window);
    let router = Router::new()
        .with_overrides(config.verbatim_sources.iter().copied())
        .with_textless_policy(config.textless_policy)
        .with_source_label(config.source_label.clone());

    let processor = RelayProcessor::new(
        Arc::clone(&transport),
        classifier,
        rules,
        assembler,
        Chunker::new(config.budget),
        router,
    );

    let stream = transport.subscribe().await?;

    tokio::select! {
        _ = processor.run(stream) => {
            tracing::warn!("Item stream closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, shutting down");
        }
    }

    Ok(())
}

/// Ask every backend a fixed question and print who answered.
async fn probe(
    backends: &[Arc<dyn feed_relay::llm::JudgmentBackend>],
    config: &RelayConfig,
) -> anyhow::Result<()> {
    eprintln!("🔎 Probing {} backends...\n", backends.len());
    let reports = probe_backends(backends, config.backend_timeout, DEFAULT_PROBE_CONCURRENCY).await;

    let mut alive = 0;
    for report in &reports {
        match &report.answer {
            Ok(answer) if report.is_alive() => {
                alive += 1;
                println!(
                    "✅ {} ({:.1}s): {}",
                    report.backend,
                    report.latency.as_secs_f64(),
                    answer
                );
            }
            Ok(_) => println!("⚠️ {}: empty answer", report.backend),
            Err(reason) => println!("❌ {}: {}", report.backend, reason),
        }
    }
    println!("\n{alive}/{} backends alive", reports.len());
    Ok(())
}
