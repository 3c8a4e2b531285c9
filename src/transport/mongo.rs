use std::pin::Pin;

use mongodb::bson::{doc, Document};
use mongodb::change_stream::event::ChangeStreamEvent;
use mongodb::Database;
use tokio_stream::{Stream, StreamExt};

use super::FeedTransport;
use crate::error::FeedError;

type MongoFeed =
    Pin<Box<dyn Stream<Item = Result<ChangeStreamEvent<Document>, FeedError>> + Send>>;

/// Change streams on the collections of one mongo database.
#[derive(Clone, Debug)]
pub struct MongoTransport {
    db: Database,
}

impl MongoTransport {
    /// Creates a transport watching collections of `db`.
    ///
    /// # Arguments
    ///
    /// * `db` - The mongo database whose collections are watched.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The watched database.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl FeedTransport for MongoTransport {
    type Event = ChangeStreamEvent<Document>;
    type Feed = MongoFeed;

    async fn probe(&self, resource: &str) -> Result<(), FeedError> {
        let names = self
            .db
            .list_collection_names(doc! { "name": resource })
            .await?;
        if names.iter().any(|name| name == resource) {
            Ok(())
        } else {
            Err(FeedError::Resource(format!(
                "collection '{}' not found in database '{}'",
                resource,
                self.db.name()
            )))
        }
    }

    async fn subscribe(&self, resource: &str) -> Result<MongoFeed, FeedError> {
        // watch() returns once the server has opened the change stream cursor.
        let stream = self
            .db
            .collection::<Document>(resource)
            .watch(None, None)
            .await?;

        let feed = stream.map(|next| next.map_err(|e| FeedError::Stream(e.to_string())));
        Ok(Box::pin(feed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::{options::ClientOptions, Client};

    // Building a client does not touch the network.
    async fn offline_database() -> Database {
        let client_options = ClientOptions::parse("mongodb://localhost:27017")
            .await
            .unwrap();
        let client = Client::with_options(client_options).unwrap();
        client.database("sample_mflix")
    }

    #[tokio::test]
    async fn test_transport_keeps_database() {
        let transport = MongoTransport::new(offline_database().await);
        assert_eq!(transport.database().name(), "sample_mflix");
    }
}
