//! Change event classification.
//!
//! The subscriber treats events as opaque values; this module gives the
//! mongo events a readable shape for logging.

use mongodb::bson::Document;
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};

/// The kind of mutation a change event reports.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub enum ChangeKind {
    /// Document insertion
    Insert,
    /// Partial document update
    Update,
    /// Whole document replacement
    Replace,
    /// Document deletion
    Delete,
    /// Anything else (drop, rename, invalidate, ...)
    Other,
}

impl ChangeKind {
    /// Returns a string representation of the change kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Other => "other",
        }
    }

    /// Returns true for kinds that touch a single document.
    pub fn is_document_change(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl From<&OperationType> for ChangeKind {
    fn from(op_type: &OperationType) -> Self {
        match op_type {
            OperationType::Insert => ChangeKind::Insert,
            OperationType::Update => ChangeKind::Update,
            OperationType::Replace => ChangeKind::Replace,
            OperationType::Delete => ChangeKind::Delete,
            _ => ChangeKind::Other,
        }
    }
}

impl From<OperationType> for ChangeKind {
    fn from(op_type: OperationType) -> Self {
        ChangeKind::from(&op_type)
    }
}

/// One-line summary of a mongo change event: kind plus document key.
pub fn describe(event: &ChangeStreamEvent<Document>) -> String {
    let kind = ChangeKind::from(&event.operation_type);
    match &event.document_key {
        Some(key) => format!("{} {}", kind.as_str(), key),
        None => kind.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::change_stream::event::OperationType;

    #[test]
    fn test_as_str() {
        assert_eq!(ChangeKind::Insert.as_str(), "insert");
        assert_eq!(ChangeKind::Update.as_str(), "update");
        assert_eq!(ChangeKind::Replace.as_str(), "replace");
        assert_eq!(ChangeKind::Delete.as_str(), "delete");
        assert_eq!(ChangeKind::Other.as_str(), "other");
    }

    #[test]
    fn test_from_operation_type() {
        assert_eq!(ChangeKind::from(OperationType::Insert), ChangeKind::Insert);
        assert_eq!(ChangeKind::from(OperationType::Update), ChangeKind::Update);
        assert_eq!(ChangeKind::from(OperationType::Replace), ChangeKind::Replace);
        assert_eq!(ChangeKind::from(OperationType::Delete), ChangeKind::Delete);
    }

    #[test]
    fn test_collection_level_operations_are_other() {
        assert_eq!(ChangeKind::from(OperationType::Invalidate), ChangeKind::Other);
        assert_eq!(ChangeKind::from(OperationType::Drop), ChangeKind::Other);
        assert!(!ChangeKind::Other.is_document_change());
        assert!(ChangeKind::Replace.is_document_change());
    }
}
