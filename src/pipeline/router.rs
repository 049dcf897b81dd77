//! Destination choice and outbound send planning.

use std::collections::HashMap;

use crate::classifier::Decision;
use crate::pipeline::render::{escape_attr, escape_html};
use crate::pipeline::types::{Attachment, Delivery, Destination, Provenance, Segment};

/// Max attachments in one album.
pub const MAX_ALBUM_SIZE: usize = 10;

/// Default label in front of the provenance link.
pub const DEFAULT_SOURCE_LABEL: &str = "Источник";

/// What to do with attachment-only items (no text to classify).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextlessPolicy {
    Accept,
    #[default]
    Reject,
    Drop,
}

impl TextlessPolicy {
    /// Destination for a textless item, `None` when it is dropped.
    pub fn destination(&self) -> Option<Destination> {
        match self {
            Self::Accept => Some(Destination::Primary),
            Self::Reject => Some(Destination::Secondary),
            Self::Drop => None,
        }
    }
}

impl std::str::FromStr for TextlessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            "drop" => Ok(Self::Drop),
            other => Err(format!("unknown textless policy '{other}'")),
        }
    }
}

/// Routing rules plus the provenance suffix format.
#[derive(Debug, Clone)]
pub struct Router {
    /// Source feed id → forced destination. Bypasses classification.
    overrides: HashMap<i64, Destination>,
    textless: TextlessPolicy,
    source_label: String,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            textless: TextlessPolicy::default(),
            source_label: DEFAULT_SOURCE_LABEL.to_string(),
        }
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, feed_id: i64, destination: Destination) -> Self {
        self.overrides.insert(feed_id, destination);
        self
    }

    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (i64, Destination)>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    pub fn with_textless_policy(mut self, policy: TextlessPolicy) -> Self {
        self.textless = policy;
        self
    }

    pub fn with_source_label(mut self, label: impl Into<String>) -> Self {
        self.source_label = label.into();
        self
    }

    pub fn textless_policy(&self) -> TextlessPolicy {
        self.textless
    }

    /// Forced destination for items from `feed_id`, if any.
    pub fn override_for(&self, feed_id: i64) -> Option<Destination> {
        self.overrides.get(&feed_id).copied()
    }

    pub fn route(&self, decision: Decision) -> Destination {
        match decision {
            Decision::Accept => Destination::Primary,
            Decision::Reject => Destination::Secondary,
        }
    }

    /// Provenance line in markup, with the blank-line separator in front.
    ///
    /// A feed with a public handle is linked as `https://t.me/<handle>`;
    /// otherwise its name and numeric id (or the opaque placeholder) are
    /// shown as text.
    pub fn provenance_suffix(&self, provenance: &Provenance) -> String {
        let source = match provenance {
            Provenance::Resolved { feed_id, identity } => match &identity.handle {
                Some(handle) => format!(
                    "<a href=\"https://t.me/{}\">{}</a>",
                    escape_attr(handle),
                    escape_html(&identity.display_name)
                ),
                // Private feed: the id is the only way to find it again.
                None if identity.display_name == feed_id.to_string() => feed_id.to_string(),
                None => format!("{} (ID: {feed_id})", escape_html(&identity.display_name)),
            },
            Provenance::Opaque(text) => escape_html(text),
        };
        format!("\n\n{}: {source}", escape_html(&self.source_label))
    }

    /// Turn segments into sends, in order.
    ///
    /// A caption segment goes out as an album with its attachments. Albums
    /// hold at most [`MAX_ALBUM_SIZE`] items, so extra attachments follow as
    /// captionless albums. Every other segment is a text message.
    pub fn plan(&self, segments: Vec<Segment>) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for segment in segments {
            if segment.caption && !segment.attachments.is_empty() {
                let caption = (!segment.body.trim().is_empty()).then_some(segment.body);
                push_albums(&mut deliveries, segment.attachments, caption);
            } else if !segment.body.trim().is_empty() {
                deliveries.push(Delivery::Text(segment.body));
            }
        }
        deliveries
    }
}

fn push_albums(deliveries: &mut Vec<Delivery>, attachments: Vec<Attachment>, caption: Option<String>) {
    let mut caption = caption;
    for chunk in attachments.chunks(MAX_ALBUM_SIZE) {
        deliveries.push(Delivery::Album {
            attachments: chunk.to_vec(),
            caption: caption.take(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{AttachmentKind, Identity};

    fn photos(n: usize) -> Vec<Attachment> {
        (0..n)
            .map(|i| Attachment::new(AttachmentKind::Photo, format!("p{i}")))
            .collect()
    }

    fn segment(body: &str, attachments: Vec<Attachment>) -> Segment {
        let caption = !attachments.is_empty();
        Segment {
            body: body.into(),
            source: 0..body.len(),
            attachments,
            caption,
        }
    }

    #[test]
    fn decisions_map_to_feeds() {
        let router = Router::new();
        assert_eq!(router.route(Decision::Accept), Destination::Primary);
        assert_eq!(router.route(Decision::Reject), Destination::Secondary);
    }

    #[test]
    fn overrides_are_per_feed() {
        let router = Router::new()
            .with_override(-1001, Destination::Primary)
            .with_overrides([(-1002, Destination::Secondary)]);
        assert_eq!(router.override_for(-1001), Some(Destination::Primary));
        assert_eq!(router.override_for(-1002), Some(Destination::Secondary));
        assert_eq!(router.override_for(-1003), None);
    }

    #[test]
    fn textless_policy_parsing_and_targets() {
        assert_eq!("Drop".parse::<TextlessPolicy>(), Ok(TextlessPolicy::Drop));
        assert!("maybe".parse::<TextlessPolicy>().is_err());
        assert_eq!(TextlessPolicy::default(), TextlessPolicy::Reject);
        assert_eq!(TextlessPolicy::Reject.destination(), Some(Destination::Secondary));
        assert_eq!(TextlessPolicy::Accept.destination(), Some(Destination::Primary));
        assert_eq!(TextlessPolicy::Drop.destination(), None);
    }

    #[test]
    fn suffix_links_public_handle() {
        let router = Router::new();
        let provenance = Provenance::Resolved {
            feed_id: -100,
            identity: Identity {
                display_name: "Cases & Tools".into(),
                handle: Some("cases_tools".into()),
            },
        };
        assert_eq!(
            router.provenance_suffix(&provenance),
            "\n\nИсточник: <a href=\"https://t.me/cases_tools\">Cases &amp; Tools</a>"
        );
    }

    #[test]
    fn suffix_without_handle_shows_name_and_id() {
        let router = Router::new().with_source_label("Source");
        let private = Provenance::Resolved {
            feed_id: -100,
            identity: Identity {
                display_name: "<Private>".into(),
                handle: None,
            },
        };
        assert_eq!(
            router.provenance_suffix(&private),
            "\n\nSource: &lt;Private&gt; (ID: -100)"
        );
        let untitled = Provenance::Resolved {
            feed_id: -100,
            identity: Identity {
                display_name: "-100".into(),
                handle: None,
            },
        };
        assert_eq!(router.provenance_suffix(&untitled), "\n\nSource: -100");
        assert_eq!(
            router.provenance_suffix(&Provenance::opaque(-5)),
            "\n\nSource: channel -5"
        );
    }

    #[test]
    fn text_only_plan() {
        let plan = Router::new().plan(vec![segment("one", vec![]), segment("two", vec![])]);
        assert_eq!(plan, vec![
            Delivery::Text("one".into()),
            Delivery::Text("two".into())
        ]);
    }

    #[test]
    fn caption_segment_becomes_album() {
        let plan = Router::new().plan(vec![segment("cap", photos(2)), segment("rest", vec![])]);
        assert_eq!(plan, vec![
            Delivery::Album {
                attachments: photos(2),
                caption: Some("cap".into()),
            },
            Delivery::Text("rest".into()),
        ]);
    }

    #[test]
    fn large_albums_are_split() {
        let plan = Router::new().plan(vec![segment("cap", photos(23))]);
        assert_eq!(plan.len(), 3);
        match &plan[0] {
            Delivery::Album {
                attachments,
                caption,
            } => {
                assert_eq!(attachments.len(), MAX_ALBUM_SIZE);
                assert_eq!(caption.as_deref(), Some("cap"));
            }
            other => panic!("Expected album, got {:?}", other),
        }
        match &plan[2] {
            Delivery::Album {
                attachments,
                caption,
            } => {
                assert_eq!(attachments.len(), 3);
                assert!(caption.is_none());
            }
            other => panic!("Expected album, got {:?}", other),
        }
    }

    #[test]
    fn empty_caption_is_omitted() {
        let plan = Router::new().plan(vec![segment("", photos(1))]);
        assert_eq!(plan, vec![Delivery::Album {
            attachments: photos(1),
            caption: None,
        }]);
    }
}
