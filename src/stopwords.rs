//! Stop-word filtering.
//!
//! A post whose normalized words intersect the stop set is dropped before
//! classification. Normalization here is simple lower-casing and punctuation
//! trimming; a morphological normalizer can be plugged in behind
//! [`StopWords`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Source of the stop set and the word normalizer applied to post texts.
pub trait StopWords: Send + Sync {
    /// Normalized word set of a text.
    fn normalize(&self, text: &str) -> HashSet<String>;

    /// Current stop set, already normalized.
    fn current_stop_set(&self) -> HashSet<String>;

    /// First stop word found in `text`, if any. Deterministic: the
    /// lexicographically smallest hit.
    fn first_hit(&self, text: &str) -> Option<String> {
        let stop = self.current_stop_set();
        if stop.is_empty() {
            return None;
        }
        self.normalize(text)
            .intersection(&stop)
            .min()
            .cloned()
    }
}

/// Lower-case and split on whitespace, trimming non-alphanumeric characters
/// from both ends of each word.
pub fn simple_normalize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect()
}

/// Stop words read from a UTF-8 file, one word per line. The file is re-read
/// on every call so edits apply without a restart. A missing file means an
/// empty set.
#[derive(Debug, Clone)]
pub struct StopWordFile {
    path: PathBuf,
}

impl StopWordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StopWords for StopWordFile {
    fn normalize(&self, text: &str) -> HashSet<String> {
        simple_normalize(text)
    }

    fn current_stop_set(&self) -> HashSet<String> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stop-word file");
                return HashSet::new();
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read stop-word file, filtering disabled for this item"
                );
                return HashSet::new();
            }
        };
        raw.lines().flat_map(simple_normalize).collect()
    }
}

/// Fixed stop set held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticStopWords {
    words: HashSet<String>,
}

impl StaticStopWords {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words
                .into_iter()
                .flat_map(|w| simple_normalize(w.as_ref()))
                .collect(),
        }
    }
}

impl StopWords for StaticStopWords {
    fn normalize(&self, text: &str) -> HashSet<String> {
        simple_normalize(text)
    }

    fn current_stop_set(&self) -> HashSet<String> {
        self.words.clone()
    }
}
