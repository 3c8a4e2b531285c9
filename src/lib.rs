//! # Ordered MongoDB change feeds
//!
//! This crate wraps change streams in a subscription with an explicit
//! handshake: the handler is registered and the transport has confirmed the
//! feed before the caller issues the mutation it wants to observe, and the
//! feed is released deterministically afterwards.
//!
//! ## Features
//!
//! - Readiness acknowledgment sourced from the transport, no sleeps
//! - Serialized, order-preserving handler dispatch
//! - Idempotent close that cancels a pending readiness wait
//! - Typed errors; mid-stream drops are surfaced, never silently retried
//! - An in-memory transport with fault injection for testing handlers
//! - A quickstart walkthrough of the driver's CRUD surface
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::{sync::Arc, time::Duration};
//! use mongodb::{bson::doc, options::ClientOptions, Client};
//! use mongo_change_feed::{ChangeFeedSubscriber, HandlerError, MongoTransport};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let client_options = ClientOptions::parse("mongodb://localhost:27017").await?;
//!     let client = Client::with_options(client_options)?;
//!     let db = client.database("sample_mflix");
//!
//!     let subscriber = ChangeFeedSubscriber::new(Arc::new(MongoTransport::new(db.clone())));
//!     let subscription = subscriber.open("movies").await?;
//!     subscription.on_event(|change| {
//!         Box::pin(async move {
//!             println!("received a change: {:?}", change.operation_type);
//!             Ok::<(), HandlerError>(())
//!         })
//!     });
//!
//!     // Only mutate once the feed is confirmed.
//!     subscription.await_ready(Duration::from_secs(5)).await?;
//!     db.collection("movies").insert_one(doc! { "test": "sample movie document" }, None).await?;
//!
//!     // ... wait for the handler ...
//!     subscription.close().await?;
//!     Ok(())
//! }
//! ```

pub mod bulk;
pub mod config;
mod error;
mod event;
pub mod quickstart;
mod stream;
pub mod transport;

pub use config::QuickstartConfig;
pub use error::{Error, FeedError, Result};
pub use event::{describe, ChangeKind};
pub use stream::{ChangeFeedSubscriber, HandlerError, Subscription, SubscriptionState};
pub use transport::{FeedTransport, MemoryTransport, MongoTransport};
