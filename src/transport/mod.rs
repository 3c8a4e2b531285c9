//! Transports that carry change feeds to a [`ChangeFeedSubscriber`].
//!
//! A transport knows how to check that a resource can be watched and how to
//! establish the feed itself. The future returned by
//! [`FeedTransport::subscribe`] resolving is the readiness acknowledgment:
//! once it yields a feed, every mutation committed afterwards is delivered.
//!
//! [`ChangeFeedSubscriber`]: crate::ChangeFeedSubscriber

use std::future::Future;

use tokio_stream::Stream;

use crate::error::FeedError;

mod memory;
mod mongo;

pub use memory::MemoryTransport;
pub use mongo::MongoTransport;

/// Source of live change feeds.
pub trait FeedTransport: Send + Sync + 'static {
    /// The event type delivered by this transport. Opaque to the subscriber.
    type Event: Send + 'static;

    /// An established feed, yielding events in commit order.
    type Feed: Stream<Item = Result<Self::Event, FeedError>> + Send + Unpin + 'static;

    /// Checks that the transport is reachable and `resource` exists.
    ///
    /// Fails with [`FeedError::Connection`] or [`FeedError::Resource`].
    fn probe(&self, resource: &str) -> impl Future<Output = Result<(), FeedError>> + Send;

    /// Establishes a feed on `resource`, resolving once the transport has
    /// confirmed the subscription is active.
    fn subscribe(
        &self,
        resource: &str,
    ) -> impl Future<Output = Result<Self::Feed, FeedError>> + Send;
}
