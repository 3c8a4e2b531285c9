//! Quickstart configuration.

use std::time::Duration;

use tracing::warn;

/// Default connection string.
pub const DEFAULT_URI: &str = "mongodb://localhost:27017";

/// Default database, from the mongo sample datasets.
pub const DEFAULT_DATABASE: &str = "sample_mflix";

/// Collection the CRUD and watch sections run against.
pub const DEFAULT_COLLECTION: &str = "movies";

/// Collection the bulk write section runs against.
pub const DEFAULT_BULK_COLLECTION: &str = "theaters";

/// How long to wait for the change feed to be confirmed.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the handler to observe the triggering insert.
pub const DEFAULT_OBSERVE_WINDOW: Duration = Duration::from_secs(2);

/// Quickstart configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickstartConfig {
    /// Mongo connection string.
    pub uri: String,

    /// Database name.
    pub database: String,

    /// Collection for the CRUD and watch sections.
    pub collection: String,

    /// Collection for the bulk write section.
    pub bulk_collection: String,

    /// Readiness timeout for the change feed.
    pub ready_timeout: Duration,

    /// Observation window for the triggering insert.
    pub observe_window: Duration,
}

impl QuickstartConfig {
    /// Create a configuration for the given connection string.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            bulk_collection: DEFAULT_BULK_COLLECTION.to_string(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            observe_window: DEFAULT_OBSERVE_WINDOW,
        }
    }

    /// Load from `MONGODB_URI` and the `QUICKSTART_*` variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names. Unset variables keep
    /// their defaults; unparsable durations are ignored with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(lookup("MONGODB_URI").unwrap_or_else(|| DEFAULT_URI.into()));

        if let Some(database) = lookup("QUICKSTART_DB") {
            config.database = database;
        }
        if let Some(collection) = lookup("QUICKSTART_COLLECTION") {
            config.collection = collection;
        }
        if let Some(collection) = lookup("QUICKSTART_BULK_COLLECTION") {
            config.bulk_collection = collection;
        }
        if let Some(timeout) = millis(&lookup, "QUICKSTART_READY_TIMEOUT_MS") {
            config.ready_timeout = timeout;
        }
        if let Some(window) = millis(&lookup, "QUICKSTART_OBSERVE_MS") {
            config.observe_window = window;
        }

        config
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the collection for the CRUD and watch sections.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Set the readiness timeout.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the observation window.
    pub fn with_observe_window(mut self, window: Duration) -> Self {
        self.observe_window = window;
        self
    }
}

impl Default for QuickstartConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URI)
    }
}

fn millis<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring invalid duration");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = QuickstartConfig::default();
        assert_eq!(config.uri, DEFAULT_URI);
        assert_eq!(config.database, DEFAULT_DATABASE);
        assert_eq!(config.collection, DEFAULT_COLLECTION);
        assert_eq!(config.bulk_collection, DEFAULT_BULK_COLLECTION);
        assert_eq!(config.ready_timeout, DEFAULT_READY_TIMEOUT);
        assert_eq!(config.observe_window, DEFAULT_OBSERVE_WINDOW);
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = QuickstartConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config, QuickstartConfig::default());
    }

    #[test]
    fn test_environment_overrides() {
        let config = QuickstartConfig::from_lookup(lookup_from(&[
            ("MONGODB_URI", "mongodb://db.internal:27017"),
            ("QUICKSTART_DB", "films"),
            ("QUICKSTART_COLLECTION", "shorts"),
            ("QUICKSTART_BULK_COLLECTION", "cinemas"),
            ("QUICKSTART_READY_TIMEOUT_MS", "750"),
            ("QUICKSTART_OBSERVE_MS", " 1500 "),
        ]));

        assert_eq!(config.uri, "mongodb://db.internal:27017");
        assert_eq!(config.database, "films");
        assert_eq!(config.collection, "shorts");
        assert_eq!(config.bulk_collection, "cinemas");
        assert_eq!(config.ready_timeout, Duration::from_millis(750));
        assert_eq!(config.observe_window, Duration::from_millis(1500));
    }

    #[test]
    fn test_invalid_duration_keeps_default() {
        let config = QuickstartConfig::from_lookup(lookup_from(&[(
            "QUICKSTART_READY_TIMEOUT_MS",
            "soon",
        )]));
        assert_eq!(config.ready_timeout, DEFAULT_READY_TIMEOUT);
    }

    #[test]
    fn test_config_builder() {
        let config = QuickstartConfig::new("mongodb://example:27017")
            .with_database("test_db")
            .with_collection("test_collection")
            .with_ready_timeout(Duration::from_millis(100))
            .with_observe_window(Duration::from_millis(200));

        assert_eq!(config.database, "test_db");
        assert_eq!(config.collection, "test_collection");
        assert_eq!(config.ready_timeout, Duration::from_millis(100));
        assert_eq!(config.observe_window, Duration::from_millis(200));
    }
}
