use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::retry::RetryPolicy;

/// Where the relations live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreLocation {
    /// Private in-memory database; forces a single pooled connection.
    Memory,
    /// SQLite file, opened in WAL mode and created if missing.
    File(PathBuf),
}

/// Configuration options supplied when opening a [`super::SqliteStore`].
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Database location.
    pub location: StoreLocation,
    /// Number of pooled connections for file databases.
    pub pool_size: usize,
    /// How long SQLite itself waits on a lock before reporting `SQLITE_BUSY`.
    pub busy_timeout: Duration,
    /// Retry schedule applied at the accessor boundary.
    pub retry: RetryPolicy,
    /// Source of server-assigned tweet timestamps.
    pub clock: Arc<dyn Clock>,
}

impl StoreOptions {
    /// Options for an in-memory store.
    pub fn memory() -> Self {
        Self::new(StoreLocation::Memory)
    }

    /// Options for a file-backed store at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(StoreLocation::File(path.into()))
    }

    /// Creates options with default settings for `location`.
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            pool_size: 4,
            busy_timeout: Duration::from_millis(250),
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the pooled connection count (ignored for in-memory stores).
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets SQLite's internal busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the retry schedule.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Sets the timestamp source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
