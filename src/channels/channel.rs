//! Feed transport abstraction.
//!
//! The relay never owns a connection. Everything it needs from the outside
//! world (receiving posts, looking up siblings, resolving identities and
//! delivering output) goes through [`FeedTransport`].

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;
use crate::pipeline::types::{ContentItem, Delivery, Destination, Identity, MessageHandle};

/// Stream of inbound items.
pub type ItemStream = Pin<Box<dyn Stream<Item = ContentItem> + Send>>;

/// Capability the relay uses to talk to the feed platform.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Transport name (e.g. "telegram").
    fn name(&self) -> &str;

    /// Start receiving inbound items.
    async fn subscribe(&self) -> Result<ItemStream, ChannelError>;

    /// Look up a single item by id within a feed. `Ok(None)` if it is unknown.
    async fn lookup(&self, feed_id: i64, id: i64) -> Result<Option<ContentItem>, ChannelError>;

    /// Resolve the public identity of a feed.
    async fn resolve_identity(&self, feed_id: i64) -> Result<Identity, ChannelError>;

    /// Deliver one message to a destination feed.
    async fn deliver(
        &self,
        destination: Destination,
        delivery: Delivery,
    ) -> Result<MessageHandle, ChannelError>;
}
