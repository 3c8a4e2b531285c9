//! Error types for change feed and quickstart operations.
//!
//! [`FeedError`] covers the subscription lifecycle; [`Error`] is the
//! crate-level type returned by the quickstart walkthrough.

use std::time::Duration;

use mongodb::error::ErrorKind;
use thiserror::Error;

/// Server error code for a missing namespace.
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Errors raised while opening, observing, or releasing a change feed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The transport is unreachable.
    #[error("connection error: {0}")]
    Connection(String),

    /// The watched resource does not exist.
    #[error("resource error: {0}")]
    Resource(String),

    /// The transport did not confirm the subscription in time.
    #[error("subscription not ready after {0:?}")]
    Timeout(Duration),

    /// The feed dropped after it became active.
    #[error("stream error: {0}")]
    Stream(String),

    /// Releasing the subscription failed.
    #[error("close error: {0}")]
    Close(String),

    /// The subscription was closed while waiting for readiness.
    #[error("subscription cancelled")]
    Cancelled,
}

impl FeedError {
    /// Returns true when retrying `open` may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

// Classify driver failures by what they mean for a feed.
impl From<mongodb::error::Error> for FeedError {
    fn from(error: mongodb::error::Error) -> Self {
        let message = error.to_string();
        match error.kind.as_ref() {
            ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => Self::Connection(message),
            ErrorKind::Command(command) if command.code == NAMESPACE_NOT_FOUND => {
                Self::Resource(message)
            }
            _ => Self::Stream(message),
        }
    }
}

/// Errors surfaced by the quickstart walkthrough.
#[derive(Debug, Error)]
pub enum Error {
    /// A driver call failed.
    #[error("driver error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// The change feed failed.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// An ordered bulk write stopped at the given operation.
    #[error("bulk write aborted at operation {index}: {source}")]
    Bulk {
        /// Position of the failing operation in the batch.
        index: usize,
        /// The driver error for that operation.
        #[source]
        source: mongodb::error::Error,
    },

    /// The triggering insert was never observed by the change handler.
    #[error("no change event observed within {0:?}")]
    NotObserved(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_formatting() {
        let err = FeedError::Resource("movies".into());
        assert_eq!(format!("{}", err), "resource error: movies");

        let err = FeedError::Timeout(Duration::from_millis(500));
        assert_eq!(format!("{}", err), "subscription not ready after 500ms");
    }

    #[test]
    fn test_only_timeout_is_retryable() {
        assert!(FeedError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!FeedError::Connection("down".into()).is_retryable());
        assert!(!FeedError::Stream("dropped".into()).is_retryable());
        assert!(!FeedError::Cancelled.is_retryable());
    }

    #[test]
    fn test_feed_error_is_transparent() {
        let err: Error = FeedError::Cancelled.into();
        assert_eq!(err.to_string(), "subscription cancelled");
        assert!(err.source().is_none());
    }

    fn command_error(code: i32, code_name: &str) -> mongodb::error::Error {
        let command: mongodb::error::CommandError = mongodb::bson::from_document(
            mongodb::bson::doc! { "code": code, "codeName": code_name, "errmsg": "server said no" },
        )
        .unwrap();
        mongodb::error::Error::from(ErrorKind::Command(command))
    }

    #[test]
    fn test_server_selection_maps_to_connection() {
        let err = mongodb::error::Error::from(ErrorKind::ServerSelection {
            message: "no available servers".into(),
        });
        assert!(matches!(FeedError::from(err), FeedError::Connection(_)));
    }

    #[test]
    fn test_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = mongodb::error::Error::from(io);
        assert!(matches!(FeedError::from(err), FeedError::Connection(_)));
    }

    #[test]
    fn test_namespace_not_found_maps_to_resource() {
        let err = command_error(NAMESPACE_NOT_FOUND, "NamespaceNotFound");
        assert!(matches!(FeedError::from(err), FeedError::Resource(_)));
    }

    #[test]
    fn test_other_driver_errors_map_to_stream() {
        let err = command_error(40573, "Location40573");
        assert!(matches!(FeedError::from(err), FeedError::Stream(_)));

        let err = mongodb::error::Error::from(ErrorKind::InvalidArgument {
            message: "bad pipeline".into(),
        });
        assert!(matches!(FeedError::from(err), FeedError::Stream(_)));
    }

    #[test]
    fn test_not_observed_message() {
        let err = Error::NotObserved(Duration::from_secs(2));
        assert_eq!(err.to_string(), "no change event observed within 2s");
    }
}
