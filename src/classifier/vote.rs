//! Votes, labels and the majority rule.

use std::time::Duration;

use regex::Regex;

/// One backend's judgment of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Useful,
    Ad,
    Useless,
}

impl Verdict {
    pub const ALL: [Verdict; 3] = [Verdict::Useful, Verdict::Ad, Verdict::Useless];
}

/// Final routing decision for a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
        }
    }
}

/// Wire labels backends are asked to answer with, and how raw answers are
/// normalized before matching.
#[derive(Debug, Clone)]
pub struct VoteLabels {
    useful: String,
    ad: String,
    useless: String,
    /// Matches everything outside the label alphabet.
    strip: Regex,
}

impl Default for VoteLabels {
    fn default() -> Self {
        Self {
            useful: "полезно".into(),
            ad: "реклама".into(),
            useless: "бесполезно".into(),
            strip: Regex::new(r"[^а-яё]").expect("static regex"),
        }
    }
}

impl VoteLabels {
    /// Custom labels. `alphabet` is a regex character-class body (e.g. `a-z`);
    /// everything outside it is removed from answers before matching.
    pub fn new(
        useful: impl Into<String>,
        ad: impl Into<String>,
        useless: impl Into<String>,
        alphabet: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            useful: useful.into().to_lowercase(),
            ad: ad.into().to_lowercase(),
            useless: useless.into().to_lowercase(),
            strip: Regex::new(&format!("[^{alphabet}]"))?,
        })
    }

    pub fn label(&self, verdict: Verdict) -> &str {
        match verdict {
            Verdict::Useful => &self.useful,
            Verdict::Ad => &self.ad,
            Verdict::Useless => &self.useless,
        }
    }

    /// Trim, lower-case and strip an answer down to the label alphabet.
    pub fn normalize(&self, raw: &str) -> String {
        self.strip
            .replace_all(&raw.trim().to_lowercase(), "")
            .into_owned()
    }

    /// Interpret a raw answer. Returns the normalized text on mismatch.
    pub fn parse(&self, raw: &str) -> Result<Verdict, String> {
        let normalized = self.normalize(raw);
        Verdict::ALL
            .into_iter()
            .find(|v| self.label(*v) == normalized)
            .ok_or(normalized)
    }
}

/// What came back from one backend in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Valid(Verdict),
    /// Answer did not match any label; holds the normalized answer.
    Malformed(String),
    /// Call failed or timed out.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ClassificationVote {
    pub backend: String,
    pub outcome: VoteOutcome,
    pub latency: Duration,
}

impl ClassificationVote {
    pub fn verdict(&self) -> Option<Verdict> {
        match self.outcome {
            VoteOutcome::Valid(v) => Some(v),
            _ => None,
        }
    }
}

/// Count of valid votes per verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub useful: u32,
    pub ad: u32,
    pub useless: u32,
}

impl Tally {
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a ClassificationVote>) -> Self {
        let mut tally = Self::default();
        for verdict in votes.into_iter().filter_map(ClassificationVote::verdict) {
            tally.add(verdict);
        }
        tally
    }

    pub fn add(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Useful => self.useful += 1,
            Verdict::Ad => self.ad += 1,
            Verdict::Useless => self.useless += 1,
        }
    }

    pub fn valid(&self) -> u32 {
        self.useful + self.ad + self.useless
    }

    /// Accept only when useful votes outnumber all others combined.
    pub fn decision(&self) -> Decision {
        if self.useful > self.ad + self.useless {
            Decision::Accept
        } else {
            Decision::Reject
        }
    }

    /// Summary line in label terms, e.g. `полезно=3 реклама=1 бесполезно=1`.
    pub fn summary(&self, labels: &VoteLabels) -> String {
        format!(
            "{}={} {}={} {}={}",
            labels.label(Verdict::Useful),
            self.useful,
            labels.label(Verdict::Ad),
            self.ad,
            labels.label(Verdict::Useless),
            self.useless
        )
    }
}

/// Outcome of a successful classification.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub tally: Tally,
    pub decision: Decision,
    /// Rounds it took, including empty ones.
    pub rounds: u32,
    /// Votes of the deciding round.
    pub votes: Vec<ClassificationVote>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(useful: u32, ad: u32, useless: u32) -> Tally {
        Tally {
            useful,
            ad,
            useless,
        }
    }

    #[test]
    fn majority_rule() {
        assert_eq!(tally(3, 1, 1).decision(), Decision::Accept);
        assert_eq!(tally(2, 2, 1).decision(), Decision::Reject);
        assert_eq!(tally(2, 1, 1).decision(), Decision::Reject);
        assert_eq!(tally(1, 0, 0).decision(), Decision::Accept);
        assert_eq!(tally(0, 0, 0).decision(), Decision::Reject);
    }

    #[test]
    fn parses_noisy_answers() {
        let labels = VoteLabels::default();
        assert_eq!(labels.parse("  Полезно.\n"), Ok(Verdict::Useful));
        assert_eq!(labels.parse("**РЕКЛАМА**"), Ok(Verdict::Ad));
        assert_eq!(labels.parse("бесполезно!"), Ok(Verdict::Useless));
    }

    #[test]
    fn rejects_non_labels() {
        let labels = VoteLabels::default();
        assert_eq!(labels.parse("useful"), Err(String::new()));
        assert_eq!(labels.parse("Ответ: полезно"), Err("ответполезно".into()));
        assert_eq!(labels.parse("скорее полезно"), Err("скорееполезно".into()));
    }

    #[test]
    fn custom_labels() {
        let labels = VoteLabels::new("Useful", "Ad", "Useless", "a-z").unwrap();
        assert_eq!(labels.parse(" USEFUL "), Ok(Verdict::Useful));
        assert_eq!(labels.parse("ad."), Ok(Verdict::Ad));
        assert_eq!(labels.label(Verdict::Useless), "useless");
    }

    #[test]
    fn tally_counts_only_valid_votes() {
        let vote = |outcome| ClassificationVote {
            backend: "b".into(),
            outcome,
            latency: Duration::ZERO,
        };
        let votes = vec![
            vote(VoteOutcome::Valid(Verdict::Useful)),
            vote(VoteOutcome::Malformed("да".into())),
            vote(VoteOutcome::Failed("timeout".into())),
            vote(VoteOutcome::Valid(Verdict::Ad)),
        ];
        let t = Tally::from_votes(&votes);
        assert_eq!(t, tally(1, 1, 0));
        assert_eq!(t.valid(), 2);
        assert_eq!(
            t.summary(&VoteLabels::default()),
            "полезно=1 реклама=1 бесполезно=0"
        );
    }
}
