//! A walk through the driver's collection API on the mflix sample data.
//!
//! Each section is a thin call into the driver followed by a log line. The
//! watch section is the only one with sequencing of its own and goes through
//! [`ChangeFeedSubscriber`].

use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::{doc, Bson, Document};
use mongodb::change_stream::event::ChangeStreamEvent;
use mongodb::options::{
    ClientOptions, FindOneOptions, FindOptions, InsertManyOptions, ReplaceOptions, UpdateOptions,
};
use mongodb::{Client, Collection, Database};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::bulk::{bulk_write, BulkOp, BulkWriteSummary};
use crate::config::QuickstartConfig;
use crate::error::{Error, Result};
use crate::event::{describe, ChangeKind};
use crate::stream::{ChangeFeedSubscriber, HandlerError};
use crate::transport::MongoTransport;

/// Connects to the deployment named in `uri`.
pub async fn connect(uri: &str) -> Result<Client> {
    let client_options = ClientOptions::parse(uri).await?;
    Ok(Client::with_options(client_options)?)
}

/// Runs every section in order, shutting the client down afterwards.
///
/// The first failing section aborts the walkthrough.
pub async fn run(config: &QuickstartConfig) -> Result<()> {
    let client = connect(&config.uri).await?;
    let outcome = run_sections(&client, config).await;
    client.shutdown().await;
    outcome
}

async fn run_sections(client: &Client, config: &QuickstartConfig) -> Result<()> {
    let database = client.database(&config.database);
    let movies = database.collection::<Document>(&config.collection);

    find_one_movie(&movies).await?;
    find_short_movies(&movies).await?;

    insert_one_trainer(&movies).await?;
    insert_many_trainers(&movies).await?;

    update_one_plot(&movies).await?;
    update_many_comments(&movies).await?;
    replace_one_movie(&movies).await?;

    delete_one_titled(&movies).await?;
    delete_many_santa_claus(&movies).await?;

    count_movies(&movies).await?;
    distinct_years(&movies).await?;
    database_stats(&database).await?;

    watch_for_insert(&database, config).await?;

    let theaters = database.collection::<Document>(&config.bulk_collection);
    bulk_write_theaters(&theaters).await?;

    Ok(())
}

/// Highest rated movie titled "The Room", projected to title and imdb.
pub async fn find_one_movie(movies: &Collection<Document>) -> Result<Option<Document>> {
    let options = FindOneOptions::builder()
        .sort(doc! { "rating": -1 })
        .projection(doc! { "_id": 0, "title": 1, "imdb": 1 })
        .build();
    let movie = movies.find_one(doc! { "title": "The Room" }, options).await?;

    match &movie {
        Some(movie) => info!(%movie, "found movie"),
        None => info!("no movie titled 'The Room'"),
    }
    Ok(movie)
}

/// Movies shorter than 15 minutes, sorted by title.
pub async fn find_short_movies(movies: &Collection<Document>) -> Result<usize> {
    let options = FindOptions::builder()
        .sort(doc! { "title": 1 })
        .projection(doc! { "_id": 0, "title": 1, "imdb": 1 })
        .build();
    let mut cursor = movies.find(doc! { "runtime": { "$lt": 15 } }, options).await?;

    let mut found = 0;
    while let Some(movie) = cursor.next().await {
        let movie = movie?;
        info!(%movie, "short movie");
        found += 1;
    }
    if found == 0 {
        info!("No documents found!");
    }
    Ok(found)
}

/// Inserts a single trainer document and returns its id.
pub async fn insert_one_trainer(movies: &Collection<Document>) -> Result<Bson> {
    let result = movies
        .insert_one(doc! { "name": "Red", "town": "kanto" }, None)
        .await?;
    info!(inserted_id = %result.inserted_id, "1 document was inserted");
    Ok(result.inserted_id)
}

/// Ordered insert: a failure stops the remaining documents.
pub async fn insert_many_trainers(movies: &Collection<Document>) -> Result<usize> {
    let docs = vec![
        doc! { "name": "Red", "town": "Kanto" },
        doc! { "name": "Blue", "town": "Kanto" },
        doc! { "name": "Leon", "town": "Galar" },
    ];
    let options = InsertManyOptions::builder().ordered(true).build();
    let result = movies.insert_many(docs, options).await?;

    let inserted = result.inserted_ids.len();
    info!(inserted, "documents were inserted");
    Ok(inserted)
}

/// Sets the plot of "Blacksmith Scene", inserting it if missing.
pub async fn update_one_plot(movies: &Collection<Document>) -> Result<()> {
    let options = UpdateOptions::builder().upsert(true).build();
    let update = doc! {
        "$set": {
            "plot": "Blacksmith Scene is a silent film directed by William K.L. Dickson",
        }
    };
    let result = movies
        .update_one(doc! { "title": "Blacksmith Scene" }, update, options)
        .await?;
    info!(
        matched = result.matched_count,
        modified = result.modified_count,
        "updated plot"
    );
    Ok(())
}

/// Adds two comments to every G rated movie.
pub async fn update_many_comments(movies: &Collection<Document>) -> Result<()> {
    let result = movies
        .update_many(
            doc! { "rated": "G" },
            doc! { "$inc": { "num_mflix_comments": 2 } },
            None,
        )
        .await?;
    info!(
        matched = result.matched_count,
        modified = result.modified_count,
        "incremented comment counts"
    );
    Ok(())
}

/// Replaces "Blacksmith Scene" with "Sandcastles in the Sand", upserting.
///
/// Logs whether the write was a no-op, a match, a modification or an upsert.
pub async fn replace_one_movie(movies: &Collection<Document>) -> Result<()> {
    let options = ReplaceOptions::builder().upsert(true).build();
    let replacement = doc! {
        "title": "Sandcastles in the Sand",
        "plot": "Robin Sparkles mourns for a relationship with a mall rat at an idyllic beach.",
    };
    let result = movies
        .replace_one(doc! { "title": "Blacksmith Scene" }, replacement, options)
        .await?;

    if result.modified_count == 0 && result.upserted_id.is_none() {
        info!("No changes made to the collection.");
        return Ok(());
    }
    if result.matched_count == 1 {
        info!(matched = result.matched_count, "matched documents");
    }
    if result.modified_count == 1 {
        info!("Updated one document.");
    }
    if let Some(id) = &result.upserted_id {
        info!(upserted_id = %id, "inserted one new document");
    }
    Ok(())
}

/// Deletes one movie whose title is a string.
///
/// # Returns
///
/// The number of deleted documents, 0 or 1.
pub async fn delete_one_titled(movies: &Collection<Document>) -> Result<u64> {
    let result = movies
        .delete_one(doc! { "title": { "$type": "string" } }, None)
        .await?;
    if result.deleted_count == 1 {
        info!("Successfully deleted one document.");
    } else {
        info!("No documents matched the query. Deleted 0 documents.");
    }
    Ok(result.deleted_count)
}

/// Deletes every movie titled "Santa Claus".
pub async fn delete_many_santa_claus(movies: &Collection<Document>) -> Result<u64> {
    let result = movies
        .delete_many(doc! { "title": "Santa Claus" }, None)
        .await?;
    info!(deleted = result.deleted_count, "deleted documents");
    Ok(result.deleted_count)
}

/// Estimated collection size and the number of Canadian movies.
pub async fn count_movies(movies: &Collection<Document>) -> Result<(u64, u64)> {
    let estimate = movies.estimated_document_count(None).await?;
    info!(estimate, collection = movies.name(), "estimated number of documents");

    let canada = movies
        .count_documents(doc! { "countries": "Canada" }, None)
        .await?;
    info!(canada, "number of movies from Canada");
    Ok((estimate, canada))
}

/// Distinct release years of movies directed by Barbra Streisand.
pub async fn distinct_years(movies: &Collection<Document>) -> Result<Vec<Bson>> {
    let years = movies
        .distinct("year", doc! { "directors": "Barbra Streisand" }, None)
        .await?;
    info!(?years, "distinct years");
    Ok(years)
}

/// Runs `dbStats` on `database`.
pub async fn database_stats(database: &Database) -> Result<Document> {
    let stats = database.run_command(doc! { "dbStats": 1 }, None).await?;
    info!(%stats, "dbStats");
    Ok(stats)
}

/// Opens a change feed on the configured collection, inserts a document once
/// the feed is confirmed, waits for the handler to observe it, then closes the
/// feed.
pub async fn watch_for_insert(database: &Database, config: &QuickstartConfig) -> Result<()> {
    let transport = Arc::new(MongoTransport::new(database.clone()));
    let subscriber = ChangeFeedSubscriber::new(transport);
    let subscription = subscriber.open(&config.collection).await?;

    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<ChangeKind>();
    subscription.on_event(move |change: ChangeStreamEvent<Document>| {
        let ack_tx = ack_tx.clone();
        Box::pin(async move {
            info!(change = %describe(&change), "received a change to the collection");
            let _ = ack_tx.send(ChangeKind::from(&change.operation_type));
            Ok::<(), HandlerError>(())
        })
    });

    if let Err(e) = subscription.await_ready(config.ready_timeout).await {
        subscription.close().await?;
        return Err(e.into());
    }

    let movies = database.collection::<Document>(&config.collection);
    let observed = match movies
        .insert_one(doc! { "test": "sample movie document" }, None)
        .await
    {
        Ok(_) => wait_for_insert(&mut ack_rx, config.observe_window).await,
        Err(e) => Err(e.into()),
    };

    subscription.close().await?;
    observed
}

async fn wait_for_insert(
    acks: &mut mpsc::UnboundedReceiver<ChangeKind>,
    window: Duration,
) -> Result<()> {
    let seen = tokio::time::timeout(window, async {
        while let Some(kind) = acks.recv().await {
            if kind == ChangeKind::Insert {
                return true;
            }
        }
        false
    })
    .await;

    match seen {
        Ok(true) => Ok(()),
        _ => {
            warn!(?window, "triggering insert was not observed");
            Err(Error::NotObserved(window))
        }
    }
}

/// The theaters batch: two inserts, an upserting update and a delete.
pub fn theater_ops() -> Vec<BulkOp> {
    vec![
        BulkOp::insert_one(doc! {
            "location": {
                "address": { "street1": "3 Main St.", "city": "Anchorage", "state": "AK", "zipcode": "99501" },
            }
        }),
        BulkOp::insert_one(doc! {
            "location": {
                "address": { "street1": "75 Penn Plaza", "city": "New York", "state": "NY", "zipcode": "10001" },
            }
        }),
        BulkOp::update_many(
            doc! { "location.address.zipcode": "44011" },
            doc! { "$set": { "street2": "25th Floor" } },
            true,
        ),
        BulkOp::delete_one(doc! { "location.address.street1": "221b Baker St" }),
    ]
}

/// Runs [`theater_ops`] as an ordered bulk write and logs the totals.
pub async fn bulk_write_theaters(theaters: &Collection<Document>) -> Result<BulkWriteSummary> {
    let summary = bulk_write(theaters, theater_ops()).await?;
    info!(
        inserted = summary.inserted_count,
        matched = summary.matched_count,
        modified = summary.modified_count,
        upserted = summary.upserted_count(),
        deleted = summary.deleted_count,
        "bulk write complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theater_batch_shape() {
        let ops = theater_ops();
        let names: Vec<_> = ops.iter().map(BulkOp::name).collect();
        assert_eq!(names, ["insertOne", "insertOne", "updateMany", "deleteOne"]);

        match &ops[2] {
            BulkOp::UpdateMany { upsert, .. } => assert!(*upsert),
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_for_insert_skips_other_changes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ChangeKind::Update).unwrap();
        tx.send(ChangeKind::Insert).unwrap();

        assert!(wait_for_insert(&mut rx, Duration::from_millis(100))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_insert_times_out() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ChangeKind::Delete).unwrap();

        let result = wait_for_insert(&mut rx, Duration::from_millis(30)).await;
        assert!(matches!(result, Err(Error::NotObserved(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_uri() {
        assert!(matches!(
            connect("not-a-connection-string").await,
            Err(Error::Driver(_))
        ));
    }
}
