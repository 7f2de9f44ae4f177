use std::sync::Arc;
use std::time::Duration;

use crate::graph::IndexOptions;
use crate::metrics::FeedMetrics;
use crate::storage::{Clock, RetryPolicy, StoreOptions};
use crate::timeline::{CacheOptions, FanoutConfig, FanoutMode};

/// Configuration options supplied when opening a [`super::FeedService`].
#[derive(Clone)]
pub struct ServiceOptions {
    /// Storage backend settings
    pub store: StoreOptions,
    /// Follow graph index sizing
    pub index: IndexOptions,
    /// Timeline segment cache sizing and freshness
    pub cache: CacheOptions,
    /// Fan-out mode, celebrity threshold and lag target
    pub fanout: FanoutConfig,
    /// Page size used when a request does not name one
    pub default_page_size: usize,
    /// Largest page a request may ask for; larger limits are clamped
    pub max_page_size: usize,
    /// Deadline applied to home-timeline reads that do not carry their own
    pub read_deadline: Option<Duration>,
    /// Optional metrics collection implementation
    pub metrics: Option<Arc<dyn FeedMetrics>>,
}

impl ServiceOptions {
    /// Creates options with default settings over `store`.
    pub fn new(store: StoreOptions) -> Self {
        Self {
            store,
            index: IndexOptions::default(),
            cache: CacheOptions::default(),
            fanout: FanoutConfig::default(),
            default_page_size: 10,
            max_page_size: 200,
            read_deadline: Some(Duration::from_secs(2)),
            metrics: None,
        }
    }

    /// Options for a private in-memory service.
    pub fn memory() -> Self {
        Self::new(StoreOptions::memory())
    }

    /// Sets the number of pooled storage connections.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.store = self.store.pool_size(size);
        self
    }

    /// Sets the storage retry schedule.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.store = self.store.retry(policy);
        self
    }

    /// Sets the clock that stamps new tweets.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.store = self.store.clock(clock);
        self
    }

    /// Sets the follower count at which authors stop being pushed.
    pub fn celebrity_threshold(mut self, followers: usize) -> Self {
        self.fanout.celebrity_threshold = followers.max(1);
        self
    }

    /// Sets how many entries each cached segment keeps.
    pub fn segment_depth(mut self, depth: usize) -> Self {
        self.cache.depth = depth.max(1);
        self
    }

    /// Sets how long a cached segment may be served.
    pub fn max_staleness(mut self, staleness: Duration) -> Self {
        self.cache.max_staleness = staleness;
        self
    }

    /// Sets the number of cached segments.
    pub fn cache_capacity(mut self, segments: usize) -> Self {
        self.cache.capacity = segments;
        self
    }

    /// Sets the number of cached adjacency sets per direction.
    pub fn index_capacity(mut self, sets: usize) -> Self {
        self.index.capacity = sets;
        self
    }

    /// Sets the shard count of both the index and the cache.
    pub fn shards(mut self, shards: usize) -> Self {
        self.index.shards = shards;
        self.cache.shards = shards;
        self
    }

    /// Sets where fan-out runs.
    pub fn fanout_mode(mut self, mode: FanoutMode) -> Self {
        self.fanout.mode = mode;
        self
    }

    /// Sets the queueing delay above which fan-out is reported as lagging.
    pub fn fanout_target_latency(mut self, latency: Duration) -> Self {
        self.fanout.target_latency = latency;
        self
    }

    /// Sets the default page size.
    pub fn default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size.max(1);
        self
    }

    /// Sets the page size ceiling.
    pub fn max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size.max(1);
        self
    }

    /// Sets the default home-timeline deadline; `None` disables it.
    pub fn read_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.read_deadline = deadline;
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn FeedMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::memory()
    }
}
