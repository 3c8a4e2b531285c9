use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::FeedTransport;
use crate::error::FeedError;

type Slot<E> = mpsc::UnboundedSender<Result<E, FeedError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Up,
    /// Subscriptions wait for confirmation until released.
    Held,
    Down,
}

/// In-process transport with fault injection.
///
/// Events pushed with [`inject`](Self::inject) fan out to every live feed on
/// the resource. Confirmation can be held back to simulate a slow server, and
/// [`disconnect`](Self::disconnect) drops the link for pending and live feeds.
pub struct MemoryTransport<E> {
    resources: Mutex<HashSet<String>>,
    feeds: Mutex<HashMap<String, Vec<Slot<E>>>>,
    link: watch::Sender<Link>,
}

impl<E> MemoryTransport<E>
where
    E: Clone + Send + 'static,
{
    /// Creates a healthy transport with no resources.
    pub fn new() -> Self {
        let (link, _) = watch::channel(Link::Up);
        Self {
            resources: Mutex::new(HashSet::new()),
            feeds: Mutex::new(HashMap::new()),
            link,
        }
    }

    /// Adds a watchable resource.
    pub fn with_resource(self, resource: impl Into<String>) -> Self {
        self.add_resource(resource);
        self
    }

    /// Adds a watchable resource through a shared reference.
    pub fn add_resource(&self, resource: impl Into<String>) {
        lock(&self.resources).insert(resource.into());
    }

    /// Delays confirmation of new subscriptions until [`confirm`](Self::confirm).
    pub fn hold_confirmations(&self) {
        self.link.send_replace(Link::Held);
    }

    /// Confirms held subscriptions and restores a healthy link.
    pub fn confirm(&self) {
        self.link.send_replace(Link::Up);
    }

    /// Drops the link. Pending subscriptions fail and live feeds receive a
    /// stream error, then end.
    pub fn disconnect(&self) {
        self.link.send_replace(Link::Down);
        for (_, slots) in lock(&self.feeds).drain() {
            for slot in slots {
                let _ = slot.send(Err(FeedError::Stream("transport disconnected".into())));
            }
        }
    }

    /// Pushes one event to every live feed on `resource`.
    ///
    /// Returns how many feeds accepted it; feeds whose subscriber has gone
    /// away are pruned.
    pub fn inject(&self, resource: &str, event: E) -> usize {
        let mut feeds = lock(&self.feeds);
        let Some(slots) = feeds.get_mut(resource) else {
            return 0;
        };
        slots.retain(|slot| slot.send(Ok(event.clone())).is_ok());
        slots.len()
    }

    /// Number of feeds currently attached to `resource`.
    pub fn live_feeds(&self, resource: &str) -> usize {
        lock(&self.feeds)
            .get(resource)
            .map_or(0, |slots| slots.iter().filter(|slot| !slot.is_closed()).count())
    }

    fn check(&self, resource: &str) -> Result<(), FeedError> {
        if *self.link.borrow() == Link::Down {
            return Err(FeedError::Connection("transport disconnected".into()));
        }
        if !lock(&self.resources).contains(resource) {
            return Err(FeedError::Resource(format!("unknown resource '{}'", resource)));
        }
        Ok(())
    }
}

impl<E> Default for MemoryTransport<E>
where
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> FeedTransport for MemoryTransport<E>
where
    E: Clone + Send + 'static,
{
    type Event = E;
    type Feed = UnboundedReceiverStream<Result<E, FeedError>>;

    async fn probe(&self, resource: &str) -> Result<(), FeedError> {
        self.check(resource)
    }

    async fn subscribe(&self, resource: &str) -> Result<Self::Feed, FeedError> {
        self.check(resource)?;

        let mut link = self.link.subscribe();
        let confirmed = link
            .wait_for(|state| *state != Link::Held)
            .await
            .map(|state| *state == Link::Up)
            .unwrap_or(false);
        if !confirmed {
            return Err(FeedError::Connection("transport disconnected".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.feeds)
            .entry(resource.to_string())
            .or_default()
            .push(tx);
        Ok(UnboundedReceiverStream::new(rx))
    }
}

// A poisoned lock only means a test thread panicked mid-update; the maps stay usable.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_probe_reports_missing_resource() {
        let transport = MemoryTransport::<u32>::new().with_resource("movies");

        assert!(transport.probe("movies").await.is_ok());
        assert!(matches!(
            transport.probe("theaters").await,
            Err(FeedError::Resource(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_fails_when_disconnected() {
        let transport = MemoryTransport::<u32>::new().with_resource("movies");
        transport.disconnect();

        assert!(matches!(
            transport.probe("movies").await,
            Err(FeedError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_inject_fans_out_to_live_feeds() {
        let transport = MemoryTransport::new().with_resource("movies");
        let mut first = transport.subscribe("movies").await.unwrap();
        let mut second = transport.subscribe("movies").await.unwrap();

        assert_eq!(transport.inject("movies", 7), 2);
        assert_eq!(first.next().await, Some(Ok(7)));
        assert_eq!(second.next().await, Some(Ok(7)));

        drop(first);
        assert_eq!(transport.inject("movies", 8), 1);
        assert_eq!(transport.live_feeds("movies"), 1);
    }

    #[tokio::test]
    async fn test_held_subscription_waits_for_confirmation() {
        let transport = Arc::new(MemoryTransport::<u32>::new().with_resource("movies"));
        transport.hold_confirmations();

        let pending = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.subscribe("movies").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        transport.confirm();
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_and_live_feeds() {
        let transport = Arc::new(MemoryTransport::<u32>::new().with_resource("movies"));
        let mut live = transport.subscribe("movies").await.unwrap();
        transport.hold_confirmations();

        let pending = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.subscribe("movies").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.disconnect();

        assert!(matches!(
            pending.await.unwrap(),
            Err(FeedError::Connection(_))
        ));
        assert!(matches!(live.next().await, Some(Err(FeedError::Stream(_)))));
        assert_eq!(live.next().await, None);
    }
}
