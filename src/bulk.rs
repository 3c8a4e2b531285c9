//! Ordered bulk writes on a single collection.
//!
//! Operations run one after another and the batch stops at the first
//! failure, matching an ordered `bulkWrite`.

use mongodb::bson::{Bson, Document};
use mongodb::options::{ReplaceOptions, UpdateOptions};
use mongodb::Collection;
use tracing::debug;

use crate::error::{Error, Result};

/// One write in a bulk batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOp {
    /// Insert `document`.
    InsertOne {
        document: Document,
    },
    /// Apply `update` to the first match of `filter`.
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    /// Apply `update` to every match of `filter`.
    UpdateMany {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    /// Replace the first match of `filter` with `replacement`.
    ReplaceOne {
        filter: Document,
        replacement: Document,
        upsert: bool,
    },
    /// Delete the first match of `filter`.
    DeleteOne {
        filter: Document,
    },
    /// Delete every match of `filter`.
    DeleteMany {
        filter: Document,
    },
}

impl BulkOp {
    /// Creates an insert of `document`.
    pub fn insert_one(document: Document) -> Self {
        Self::InsertOne { document }
    }

    /// Creates an update of every document matching `filter`.
    ///
    /// # Arguments
    ///
    /// * `filter` - Documents to update.
    /// * `update` - Update operators to apply.
    /// * `upsert` - Insert a document when nothing matches.
    pub fn update_many(filter: Document, update: Document, upsert: bool) -> Self {
        Self::UpdateMany {
            filter,
            update,
            upsert,
        }
    }

    /// Creates a delete of the first document matching `filter`.
    pub fn delete_one(filter: Document) -> Self {
        Self::DeleteOne { filter }
    }

    /// Name of the operation as it appears in a `bulkWrite` request.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InsertOne { .. } => "insertOne",
            Self::UpdateOne { .. } => "updateOne",
            Self::UpdateMany { .. } => "updateMany",
            Self::ReplaceOne { .. } => "replaceOne",
            Self::DeleteOne { .. } => "deleteOne",
            Self::DeleteMany { .. } => "deleteMany",
        }
    }
}

/// What a single operation did.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Id of the inserted document.
    Inserted(Bson),
    /// Counts reported by an update or replace.
    Updated {
        matched: u64,
        modified: u64,
        upserted: Option<Bson>,
    },
    /// Number of deleted documents.
    Deleted(u64),
}

/// Totals for a bulk batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteSummary {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    /// Upserted ids keyed by operation index.
    pub upserted_ids: Vec<(usize, Bson)>,
    pub inserted_ids: Vec<(usize, Bson)>,
}

impl BulkWriteSummary {
    /// Folds the outcome of the operation at `index` into the totals.
    pub fn record(&mut self, index: usize, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Inserted(id) => {
                self.inserted_count += 1;
                self.inserted_ids.push((index, id));
            }
            WriteOutcome::Updated {
                matched,
                modified,
                upserted,
            } => {
                self.matched_count += matched;
                self.modified_count += modified;
                if let Some(id) = upserted {
                    self.upserted_ids.push((index, id));
                }
            }
            WriteOutcome::Deleted(count) => self.deleted_count += count,
        }
    }

    /// Number of operations that upserted a document.
    pub fn upserted_count(&self) -> u64 {
        self.upserted_ids.len() as u64
    }
}

/// Runs `ops` in order against `collection`, stopping at the first failure.
///
/// # Arguments
///
/// * `collection` - The collection to write to.
/// * `ops` - Operations, applied in order.
///
/// # Returns
///
/// The totals for the whole batch, or [`Error::Bulk`] naming the index of the
/// first failing operation. Earlier operations are not rolled back.
pub async fn bulk_write(collection: &Collection<Document>, ops: Vec<BulkOp>) -> Result<BulkWriteSummary> {
    let mut summary = BulkWriteSummary::default();

    for (index, op) in ops.into_iter().enumerate() {
        debug!(index, op = op.name(), "bulk write step");
        let outcome = apply(collection, op)
            .await
            .map_err(|source| Error::Bulk { index, source })?;
        summary.record(index, outcome);
    }

    Ok(summary)
}

async fn apply(
    collection: &Collection<Document>,
    op: BulkOp,
) -> mongodb::error::Result<WriteOutcome> {
    let outcome = match op {
        BulkOp::InsertOne { document } => {
            let result = collection.insert_one(document, None).await?;
            WriteOutcome::Inserted(result.inserted_id)
        }
        BulkOp::UpdateOne {
            filter,
            update,
            upsert,
        } => {
            let options = UpdateOptions::builder().upsert(upsert).build();
            let result = collection.update_one(filter, update, options).await?;
            WriteOutcome::Updated {
                matched: result.matched_count,
                modified: result.modified_count,
                upserted: result.upserted_id,
            }
        }
        BulkOp::UpdateMany {
            filter,
            update,
            upsert,
        } => {
            let options = UpdateOptions::builder().upsert(upsert).build();
            let result = collection.update_many(filter, update, options).await?;
            WriteOutcome::Updated {
                matched: result.matched_count,
                modified: result.modified_count,
                upserted: result.upserted_id,
            }
        }
        BulkOp::ReplaceOne {
            filter,
            replacement,
            upsert,
        } => {
            let options = ReplaceOptions::builder().upsert(upsert).build();
            let result = collection.replace_one(filter, replacement, options).await?;
            WriteOutcome::Updated {
                matched: result.matched_count,
                modified: result.modified_count,
                upserted: result.upserted_id,
            }
        }
        BulkOp::DeleteOne { filter } => {
            let result = collection.delete_one(filter, None).await?;
            WriteOutcome::Deleted(result.deleted_count)
        }
        BulkOp::DeleteMany { filter } => {
            let result = collection.delete_many(filter, None).await?;
            WriteOutcome::Deleted(result.deleted_count)
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId};

    #[test]
    fn test_op_names() {
        assert_eq!(BulkOp::insert_one(doc! {}).name(), "insertOne");
        assert_eq!(BulkOp::update_many(doc! {}, doc! {}, true).name(), "updateMany");
        assert_eq!(BulkOp::delete_one(doc! {}).name(), "deleteOne");
        assert_eq!(
            BulkOp::ReplaceOne {
                filter: doc! {},
                replacement: doc! {},
                upsert: false
            }
            .name(),
            "replaceOne"
        );
    }

    #[test]
    fn test_summary_accumulates_outcomes() {
        let first = Bson::ObjectId(ObjectId::new());
        let second = Bson::ObjectId(ObjectId::new());
        let upserted = Bson::ObjectId(ObjectId::new());

        let mut summary = BulkWriteSummary::default();
        summary.record(0, WriteOutcome::Inserted(first.clone()));
        summary.record(1, WriteOutcome::Inserted(second.clone()));
        summary.record(
            2,
            WriteOutcome::Updated {
                matched: 0,
                modified: 0,
                upserted: Some(upserted.clone()),
            },
        );
        summary.record(3, WriteOutcome::Deleted(0));

        assert_eq!(summary.inserted_count, 2);
        assert_eq!(summary.inserted_ids, vec![(0, first), (1, second)]);
        assert_eq!(summary.upserted_count(), 1);
        assert_eq!(summary.upserted_ids, vec![(2, upserted)]);
        assert_eq!(summary.deleted_count, 0);
    }

    #[test]
    fn test_summary_sums_matches_and_deletes() {
        let mut summary = BulkWriteSummary::default();
        summary.record(
            0,
            WriteOutcome::Updated {
                matched: 3,
                modified: 2,
                upserted: None,
            },
        );
        summary.record(
            1,
            WriteOutcome::Updated {
                matched: 1,
                modified: 1,
                upserted: None,
            },
        );
        summary.record(2, WriteOutcome::Deleted(4));

        assert_eq!(summary.matched_count, 4);
        assert_eq!(summary.modified_count, 3);
        assert_eq!(summary.deleted_count, 4);
        assert_eq!(summary.upserted_count(), 0);
    }
}
