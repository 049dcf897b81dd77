//! Configuration types.
//!
//! Everything is read from environment variables (after `.env` is loaded by
//! the binary). Numeric settings fall back to their defaults when unset or
//! unparsable; settings that decide where posts go are validated strictly.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::classifier::{RetryPolicy, Verdict, VoteLabels};
use crate::error::ConfigError;
use crate::pipeline::assembler::DEFAULT_GROUP_WINDOW;
use crate::pipeline::chunker::ChunkBudget;
use crate::pipeline::router::{DEFAULT_SOURCE_LABEL, TextlessPolicy};
use crate::pipeline::types::Destination;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Telegram Bot API token.
    pub bot_token: SecretString,
    /// Chat receiving accepted posts (numeric id or `@username`).
    pub primary_chat: String,
    /// Chat receiving rejected posts and diagnostics.
    pub secondary_chat: String,
    /// Source feeds to relay. Empty means every channel the bot sees.
    pub source_chats: Vec<i64>,
    pub budget: ChunkBudget,
    /// JSON file describing judgment backends.
    pub backends_file: PathBuf,
    /// Per-backend call timeout.
    pub backend_timeout: Duration,
    pub retry: RetryPolicy,
    /// Answers backends vote with.
    pub labels: VoteLabels,
    pub stopwords_file: PathBuf,
    /// Half-width of the album sibling window, in post ids.
    pub group_window: i64,
    /// Sources routed without classification.
    pub verbatim_sources: Vec<(i64, Destination)>,
    pub textless_policy: TextlessPolicy,
    pub source_label: String,
    /// Post diagnostic lines to the secondary chat as well as the log.
    pub diagnostics_to_feed: bool,
    /// Directory for the daily rolling log file. Unset disables file logging.
    pub log_dir: Option<PathBuf>,
}

impl RelayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let bot_token = SecretString::from(required("TELEGRAM_BOT_TOKEN")?);
        let primary_chat = required("FEED_RELAY_PRIMARY_CHAT")?;
        let secondary_chat = required("FEED_RELAY_SECONDARY_CHAT")?;

        let source_chats = parse_id_list(
            "FEED_RELAY_SOURCE_CHATS",
            &lookup("FEED_RELAY_SOURCE_CHATS").unwrap_or_default(),
        )?;

        let defaults = ChunkBudget::default();
        let budget = ChunkBudget {
            body: lookup("FEED_RELAY_BODY_BUDGET")
                .and_then(|s| s.trim().parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.body),
            caption: lookup("FEED_RELAY_CAPTION_BUDGET")
                .and_then(|s| s.trim().parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.caption),
        };

        let backends_file = lookup("FEED_RELAY_BACKENDS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("backends.json"));

        let backend_timeout_secs: u64 = lookup("FEED_RELAY_BACKEND_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(30);

        let backoff_secs: u64 = lookup("FEED_RELAY_BACKOFF_SECS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(1800);

        // Unset or 0 retries forever.
        let max_rounds = lookup("FEED_RELAY_MAX_ROUNDS")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|n| *n > 0);

        let vote_labels = lookup("FEED_RELAY_VOTE_LABELS");
        let vote_alphabet = lookup("FEED_RELAY_VOTE_ALPHABET");
        let labels = parse_vote_labels(vote_labels.as_deref(), vote_alphabet.as_deref())?;

        let stopwords_file = lookup("FEED_RELAY_STOPWORDS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("filter_words.txt"));

        let group_window: i64 = lookup("FEED_RELAY_GROUP_WINDOW")
            .and_then(|s| s.trim().parse().ok())
            .filter(|n: &i64| *n >= 0)
            .unwrap_or(DEFAULT_GROUP_WINDOW);

        let verbatim_sources =
            parse_verbatim_sources(&lookup("FEED_RELAY_VERBATIM_SOURCES").unwrap_or_default())?;

        let textless_policy = match lookup("FEED_RELAY_TEXTLESS_POLICY") {
            Some(raw) if !raw.trim().is_empty() => {
                raw.parse().map_err(|message| ConfigError::InvalidValue {
                    key: "FEED_RELAY_TEXTLESS_POLICY".into(),
                    message,
                })?
            }
            _ => TextlessPolicy::default(),
        };

        let source_label = lookup("FEED_RELAY_SOURCE_LABEL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE_LABEL.to_string());

        let diagnostics_to_feed = lookup("FEED_RELAY_DIAGNOSTICS_TO_FEED")
            .map(|s| parse_bool(&s))
            .unwrap_or(true);

        let log_dir = lookup("FEED_RELAY_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            bot_token,
            primary_chat,
            secondary_chat,
            source_chats,
            budget,
            backends_file,
            backend_timeout: Duration::from_secs(backend_timeout_secs),
            retry: RetryPolicy {
                backoff: Duration::from_secs(backoff_secs),
                max_rounds,
            },
            labels,
            stopwords_file,
            group_window,
            verbatim_sources,
            textless_policy,
            source_label,
            diagnostics_to_feed,
            log_dir,
        })
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_id_list(key: &str, raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{s}' is not a chat id"),
            })
        })
        .collect()
}

/// Parse `useful,ad,useless` labels. Unset keeps the Russian defaults; the
/// alphabet defaults to Cyrillic lower case.
fn parse_vote_labels(
    raw: Option<&str>,
    alphabet: Option<&str>,
) -> Result<VoteLabels, ConfigError> {
    const KEY: &str = "FEED_RELAY_VOTE_LABELS";
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    let alphabet = alphabet.map(str::trim).filter(|s| !s.is_empty());
    if raw.is_none() && alphabet.is_none() {
        return Ok(VoteLabels::default());
    }

    let defaults = VoteLabels::default();
    let words: Vec<&str> = match raw {
        Some(raw) => raw.split(',').map(str::trim).collect(),
        None => Verdict::ALL.iter().map(|v| defaults.label(*v)).collect(),
    };
    let [useful, ad, useless] = words.as_slice() else {
        return Err(ConfigError::InvalidValue {
            key: KEY.into(),
            message: format!("expected three comma-separated labels, got {}", words.len()),
        });
    };
    if words.iter().any(|w| w.is_empty()) {
        return Err(ConfigError::InvalidValue {
            key: KEY.into(),
            message: "labels must not be empty".into(),
        });
    }

    let labels = VoteLabels::new(*useful, *ad, *useless, alphabet.unwrap_or("а-яё")).map_err(
        |e| ConfigError::InvalidValue {
            key: "FEED_RELAY_VOTE_ALPHABET".into(),
            message: e.to_string(),
        },
    )?;

    // A label that normalizes to something else could never be matched.
    if let Some(verdict) = Verdict::ALL
        .iter()
        .find(|v| labels.normalize(labels.label(**v)) != labels.label(**v))
    {
        return Err(ConfigError::InvalidValue {
            key: KEY.into(),
            message: format!(
                "label '{}' has characters outside the vote alphabet",
                labels.label(*verdict)
            ),
        });
    }
    Ok(labels)
}

/// Parse `feed_id[:primary|secondary]` entries. A bare id goes to primary.
fn parse_verbatim_sources(raw: &str) -> Result<Vec<(i64, Destination)>, ConfigError> {
    const KEY: &str = "FEED_RELAY_VERBATIM_SOURCES";
    let invalid = |message: String| ConfigError::InvalidValue {
        key: KEY.to_string(),
        message,
    };

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (id, destination) = match entry.split_once(':') {
                Some((id, dest)) => (id, dest.parse::<Destination>().map_err(invalid)?),
                None => (entry, Destination::Primary),
            };
            let id = id
                .trim()
                .parse::<i64>()
                .map_err(|_| invalid(format!("'{entry}' does not start with a chat id")))?;
            Ok((id, destination))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| env.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("TELEGRAM_BOT_TOKEN", "123:ABC"),
        ("FEED_RELAY_PRIMARY_CHAT", "@good_feed"),
        ("FEED_RELAY_SECONDARY_CHAT", "-1002"),
    ];

    #[test]
    fn defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.bot_token.expose_secret(), "123:ABC");
        assert_eq!(config.primary_chat, "@good_feed");
        assert_eq!(config.budget, ChunkBudget::default());
        assert_eq!(config.backend_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.backoff, Duration::from_secs(1800));
        assert_eq!(config.retry.max_rounds, None);
        assert_eq!(config.stopwords_file, PathBuf::from("filter_words.txt"));
        assert_eq!(config.group_window, 10);
        assert!(config.verbatim_sources.is_empty());
        assert!(config.source_chats.is_empty());
        assert_eq!(config.textless_policy, TextlessPolicy::Reject);
        assert_eq!(config.source_label, "Источник");
        assert!(config.diagnostics_to_feed);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn missing_token_is_reported() {
        let err = load(&REQUIRED[1..]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("FEED_RELAY_BODY_BUDGET", "4000"),
            ("FEED_RELAY_CAPTION_BUDGET", "1000"),
            ("FEED_RELAY_MAX_ROUNDS", "5"),
            ("FEED_RELAY_BACKOFF_SECS", "60"),
            ("FEED_RELAY_VERBATIM_SOURCES", "-1001, -1003:secondary,-1004:good"),
            ("FEED_RELAY_SOURCE_CHATS", "-1001,-1005"),
            ("FEED_RELAY_TEXTLESS_POLICY", "drop"),
            ("FEED_RELAY_DIAGNOSTICS_TO_FEED", "off"),
            ("FEED_RELAY_LOG_DIR", "/var/log/feed-relay"),
        ]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.budget, ChunkBudget {
            body: 4000,
            caption: 1000
        });
        assert_eq!(config.retry.max_rounds, Some(5));
        assert_eq!(config.retry.backoff, Duration::from_secs(60));
        assert_eq!(config.verbatim_sources, vec![
            (-1001, Destination::Primary),
            (-1003, Destination::Secondary),
            (-1004, Destination::Primary),
        ]);
        assert_eq!(config.source_chats, vec![-1001, -1005]);
        assert_eq!(config.textless_policy, TextlessPolicy::Drop);
        assert!(!config.diagnostics_to_feed);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/feed-relay")));
    }

    #[test]
    fn zero_max_rounds_means_unbounded() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FEED_RELAY_MAX_ROUNDS", "0"));
        assert_eq!(load(&pairs).unwrap().retry.max_rounds, None);
    }

    #[test]
    fn bad_routing_values_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FEED_RELAY_VERBATIM_SOURCES", "-1001:nowhere"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FEED_RELAY_TEXTLESS_POLICY", "sometimes"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FEED_RELAY_BODY_BUDGET", "lots"));
        assert_eq!(load(&pairs).unwrap().budget.body, 4096);
    }

    #[test]
    fn custom_vote_labels() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("FEED_RELAY_VOTE_LABELS", "Useful, Ad, Useless"),
            ("FEED_RELAY_VOTE_ALPHABET", "a-z"),
        ]);
        let labels = load(&pairs).unwrap().labels;
        assert_eq!(labels.label(Verdict::Useful), "useful");
        assert_eq!(labels.parse(" Ad. "), Ok(Verdict::Ad));
    }

    #[test]
    fn default_vote_labels() {
        let labels = load(&REQUIRED).unwrap().labels;
        assert_eq!(labels.label(Verdict::Useless), "бесполезно");
    }

    #[test]
    fn bad_vote_labels_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FEED_RELAY_VOTE_LABELS", "yes,no"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "FEED_RELAY_VOTE_LABELS"
        ));

        // Latin labels cannot survive the default Cyrillic alphabet.
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FEED_RELAY_VOTE_LABELS", "useful,ad,useless"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "FEED_RELAY_VOTE_LABELS"
        ));
    }
}
