//! Ordered change feed subscriptions.
//!
//! A [`Subscription`] owns one background dispatch task that establishes the
//! feed, reports readiness, and drains events into the registered handler one
//! at a time. The caller sequences its work on the handshake:
//!
//! 1. [`ChangeFeedSubscriber::open`] probes the transport and starts the task.
//! 2. [`Subscription::on_event`] registers the handler.
//! 3. [`Subscription::await_ready`] resolves once the transport confirms the
//!    feed. Only then may the caller issue the mutation it wants to observe.
//! 4. [`Subscription::close`] stops the task and releases the feed. No handler
//!    call starts after `close` returns.

use std::{fmt, future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::error::FeedError;
use crate::transport::FeedTransport;

/// Error type a handler may return. Failures are logged and dispatch continues.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Async callback invoked once per change event.
type HandlerFn<E> =
    dyn Fn(E) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>> + Send + Sync;

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// Waiting for the transport to confirm the feed.
    Opening,
    /// Confirmed; events are being dispatched.
    Active,
    /// Close requested; the dispatch task is winding down.
    Closing,
    /// Released. Terminal.
    Closed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Opening => "opening",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct Lifecycle {
    state: SubscriptionState,
    /// The transport confirmed the feed at some point.
    confirmed: bool,
    /// The owner asked to close before the feed ended on its own.
    cancelled: bool,
    /// Why the feed ended, if it was not a requested close.
    fault: Option<FeedError>,
}

struct Shared<E> {
    resource: String,
    lifecycle: watch::Sender<Lifecycle>,
    handler: watch::Sender<Option<Arc<HandlerFn<E>>>>,
}

impl<E> Shared<E> {
    fn set_active(&self) {
        self.lifecycle.send_modify(|l| {
            if l.state == SubscriptionState::Opening {
                l.state = SubscriptionState::Active;
                l.confirmed = true;
            }
        });
    }

    fn set_closed(&self, fault: Option<FeedError>) {
        self.lifecycle.send_modify(|l| {
            if l.state != SubscriptionState::Closed {
                l.state = SubscriptionState::Closed;
                l.fault = fault;
            }
        });
    }

    async fn dispatch(&self, event: E) {
        let handler = self.handler.borrow().clone();
        match handler {
            Some(handler) => {
                if let Err(e) = handler(event).await {
                    warn!(resource = %self.resource, error = %e, "change handler failed, continuing");
                }
            }
            None => debug!(resource = %self.resource, "no handler registered, dropping change event"),
        }
    }
}

/// Marks the subscription closed however the dispatch task exits, panics included.
struct ClosedOnExit<E>(Arc<Shared<E>>);

impl<E> Drop for ClosedOnExit<E> {
    fn drop(&mut self) {
        self.0
            .set_closed(Some(FeedError::Close("dispatch task aborted".into())));
    }
}

/// Opens ordered subscriptions on a [`FeedTransport`].
pub struct ChangeFeedSubscriber<T> {
    transport: Arc<T>,
}

impl<T> Clone for ChangeFeedSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: FeedTransport> ChangeFeedSubscriber<T> {
    /// Creates a subscriber that opens feeds on `transport`.
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Requests a live subscription on `resource`.
    ///
    /// Fails with [`FeedError::Connection`] when the transport is unreachable
    /// and [`FeedError::Resource`] when the resource does not exist. The
    /// returned subscription is [`SubscriptionState::Opening`].
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let subscriber = ChangeFeedSubscriber::new(Arc::new(MongoTransport::new(db)));
    /// let subscription = subscriber.open("movies").await?;
    /// subscription.on_event(|change| Box::pin(async move {
    ///     println!("received a change: {:?}", change);
    ///     Ok::<(), HandlerError>(())
    /// }));
    /// subscription.await_ready(Duration::from_secs(5)).await?;
    /// movies.insert_one(doc! { "test": "sample movie document" }, None).await?;
    /// // ... wait for the handler to see it ...
    /// subscription.close().await?;
    /// ```
    pub async fn open(&self, resource: &str) -> Result<Subscription<T::Event>, FeedError> {
        self.transport.probe(resource).await?;

        let (lifecycle, _) = watch::channel(Lifecycle {
            state: SubscriptionState::Opening,
            confirmed: false,
            cancelled: false,
            fault: None,
        });
        let (handler, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            resource: resource.to_string(),
            lifecycle,
            handler,
        });

        // Create a channel to signal stream closure
        let (close_tx, close_rx) = mpsc::channel::<()>(1);

        let pump = tokio::spawn(run_feed(
            Arc::clone(&self.transport),
            Arc::clone(&shared),
            close_rx,
        ));
        debug!(resource, "subscription opening");

        Ok(Subscription {
            shared,
            close_tx,
            pump: Mutex::new(Some(pump)),
        })
    }
}

/// The dispatch task: establish the feed, then drain it into the handler.
async fn run_feed<T: FeedTransport>(
    transport: Arc<T>,
    shared: Arc<Shared<T::Event>>,
    mut close_rx: mpsc::Receiver<()>,
) {
    let _guard = ClosedOnExit(Arc::clone(&shared));
    let resource = shared.resource.as_str();

    let mut feed = tokio::select! {
        biased;
        // A dropped sender means the subscription handle itself was dropped.
        _ = close_rx.recv() => {
            debug!(resource, "subscription closed before it became active");
            shared.set_closed(None);
            return;
        }
        subscribed = transport.subscribe(resource) => match subscribed {
            Ok(feed) => feed,
            Err(e) => {
                error!(resource, error = %e, "failed to establish change feed");
                shared.set_closed(Some(e));
                return;
            }
        },
    };

    shared.set_active();
    info!(resource, "change feed active");

    loop {
        tokio::select! {
            biased;
            _ = close_rx.recv() => {
                debug!(resource, "closing change feed");
                shared.set_closed(None);
                return;
            }
            next_event = feed.next() => match next_event {
                Some(Ok(event)) => shared.dispatch(event).await,
                Some(Err(e)) => {
                    // No reconnect here; the owner decides whether to reopen.
                    error!(resource, error = %e, "change feed dropped");
                    let fault = if matches!(e, FeedError::Stream(_)) {
                        e
                    } else {
                        FeedError::Stream(e.to_string())
                    };
                    shared.set_closed(Some(fault));
                    return;
                }
                None => {
                    info!(resource, "change feed ended");
                    shared.set_closed(None);
                    return;
                }
            },
        }
    }
}

/// A live subscription on one resource.
///
/// All methods take `&self`, so the handle can be shared (for example in an
/// `Arc`) between the task waiting for readiness and the one closing it.
/// Dropping the handle without calling [`close`](Self::close) also stops the
/// dispatch task, but does not wait for it.
pub struct Subscription<E> {
    shared: Arc<Shared<E>>,
    close_tx: mpsc::Sender<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Send + 'static> Subscription<E> {
    /// Name of the watched resource.
    pub fn resource(&self) -> &str {
        &self.shared.resource
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        self.shared.lifecycle.borrow().state
    }

    /// Registers the handler invoked for each event. The last registration wins.
    ///
    /// Handlers run one at a time on the dispatch task, in delivery order.
    ///
    /// A handler must not call [`close`](Self::close) on its own subscription
    /// and await it: `close` waits for the dispatch task, which is waiting on
    /// the handler, so the two deadlock. Signal another task to close instead.
    ///
    /// # Arguments
    ///
    /// * `handler` - Async callback receiving each event by value.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(E) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>
            + Send
            + Sync
            + 'static,
    {
        let handler: Arc<HandlerFn<E>> = Arc::new(handler);
        self.shared.handler.send_replace(Some(handler));
    }

    /// Waits until the transport confirms the subscription is active.
    ///
    /// # Arguments
    ///
    /// * `timeout` - How long to wait for the transport's confirmation.
    ///
    /// # Returns
    ///
    /// `Ok` once the feed is active. Otherwise:
    ///
    /// * [`FeedError::Timeout`] if confirmation does not arrive in `timeout`,
    ///   or the link drops before confirming (the subscription is then closed).
    ///   A plain timeout leaves the subscription open; close it before retrying.
    /// * [`FeedError::Cancelled`] if the subscription is closed meanwhile.
    /// * Any other transport failure before confirmation (for example
    ///   [`FeedError::Resource`]) as-is, with the subscription closed.
    pub async fn await_ready(&self, timeout: Duration) -> Result<(), FeedError> {
        if self.shared.handler.borrow().is_none() {
            warn!(resource = %self.shared.resource, "awaiting readiness with no handler registered");
        }

        let mut lifecycle = self.shared.lifecycle.subscribe();
        let settled = tokio::time::timeout(
            timeout,
            lifecycle.wait_for(|l| l.state != SubscriptionState::Opening),
        )
        .await;

        let lifecycle = match settled {
            Err(_) => return Err(FeedError::Timeout(timeout)),
            Ok(Ok(lifecycle)) => lifecycle.clone(),
            // The sender lives in `shared`, which we hold.
            Ok(Err(_)) => return Err(FeedError::Cancelled),
        };

        match lifecycle {
            Lifecycle {
                state: SubscriptionState::Active,
                ..
            } => Ok(()),
            Lifecycle {
                cancelled: true, ..
            } => Err(FeedError::Cancelled),
            Lifecycle {
                confirmed: true,
                fault,
                ..
            } => Err(fault.unwrap_or_else(|| FeedError::Stream("change feed ended".into()))),
            // A dropped link means readiness can no longer be confirmed; other
            // faults are permanent and reach the caller as they are.
            Lifecycle { fault, .. } => match fault {
                None => Err(FeedError::Timeout(timeout)),
                Some(FeedError::Connection(cause)) => {
                    warn!(resource = %self.shared.resource, error = %cause, "link dropped before the feed was confirmed");
                    Err(FeedError::Timeout(timeout))
                }
                Some(fault) => Err(fault),
            },
        }
    }

    /// Waits for the feed to end on its own.
    ///
    /// Returns [`FeedError::Stream`] when the transport dropped mid-stream and
    /// `Ok` when the feed ended cleanly or was closed.
    pub async fn stopped(&self) -> Result<(), FeedError> {
        let mut lifecycle = self.shared.lifecycle.subscribe();
        let fault = match lifecycle
            .wait_for(|l| l.state == SubscriptionState::Closed)
            .await
        {
            Ok(lifecycle) => lifecycle.fault.clone(),
            Err(_) => None,
        };
        match fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// Closes the subscription and waits for the feed to be released.
    ///
    /// A second call returns `Ok` without side effects. A pending
    /// [`await_ready`](Self::await_ready) resolves with `Cancelled`.
    pub async fn close(&self) -> Result<(), FeedError> {
        let mut pump = self.pump.lock().await;
        let Some(handle) = pump.take() else {
            return Ok(());
        };

        self.shared.lifecycle.send_modify(|l| {
            if l.state != SubscriptionState::Closed {
                l.state = SubscriptionState::Closing;
                l.cancelled = true;
            }
        });

        // It's okay if this fails - the dispatch task may have ended already
        let _ = self.close_tx.send(()).await;

        match handle.await {
            Ok(()) => {
                debug!(resource = %self.shared.resource, "subscription closed");
                Ok(())
            }
            Err(e) => {
                error!(resource = %self.shared.resource, error = %e, "failed to release change feed");
                Err(FeedError::Close(e.to_string()))
            }
        }
    }
}

impl<E> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("resource", &self.shared.resource)
            .field("state", &self.shared.lifecycle.borrow().state)
            .finish()
    }
}
