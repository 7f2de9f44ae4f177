//! The feed service: follow graph writes, tweet posting, and timeline reads
//! wired over one storage accessor and its caches.

mod options;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::graph::{FollowGraphIndex, IndexStats};
use crate::metrics::{CounterMetrics, FeedMetrics, MetricsSnapshot};
use crate::storage::{FeedStore, SqliteStore, StoreStats};
use crate::timeline::cursor;
use crate::timeline::{
    CacheStats, FanoutDispatcher, PageSource, TimelineAssembler, TimelineCache, TimelineQuery,
    TweetPage,
};
use crate::types::{FeedKey, Result, Tweet, UserId, ValidationError};

pub use options::ServiceOptions;

/// Service-wide counters reported by [`FeedService::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    /// Row counts in storage.
    pub store: StoreStats,
    /// Follow graph index occupancy.
    pub index: IndexStats,
    /// Timeline cache occupancy.
    pub cache: CacheStats,
    /// Fan-out jobs not yet applied.
    pub fanout_backlog: usize,
    /// Counters, when the service owns its metrics sink.
    pub metrics: Option<MetricsSnapshot>,
}

/// Entry point for every feed operation.
///
/// Storage is authoritative. The follow graph index and the timeline cache are
/// derived state owned by the service and kept in step with every write it
/// performs.
pub struct FeedService {
    store: Arc<dyn FeedStore>,
    graph: Arc<FollowGraphIndex>,
    cache: Arc<TimelineCache>,
    assembler: TimelineAssembler,
    fanout: FanoutDispatcher,
    counters: Option<Arc<CounterMetrics>>,
    opts: ServiceOptions,
}

impl FeedService {
    /// Opens the SQLite store named by `opts` and builds the service over it.
    pub fn open(opts: ServiceOptions) -> Result<Self> {
        let (metrics, counters) = resolve_metrics(&opts);
        let store = SqliteStore::open(opts.store.clone())?.with_metrics(Arc::clone(&metrics));
        Ok(Self::build(Arc::new(store), opts, metrics, counters))
    }

    /// An in-memory service with default options.
    pub fn in_memory() -> Result<Self> {
        Self::open(ServiceOptions::memory())
    }

    /// Builds the service over an already opened store.
    pub fn with_store(store: Arc<dyn FeedStore>, opts: ServiceOptions) -> Self {
        let (metrics, counters) = resolve_metrics(&opts);
        Self::build(store, opts, metrics, counters)
    }

    fn build(
        store: Arc<dyn FeedStore>,
        opts: ServiceOptions,
        metrics: Arc<dyn FeedMetrics>,
        counters: Option<Arc<CounterMetrics>>,
    ) -> Self {
        let graph = Arc::new(FollowGraphIndex::with_metrics(
            Arc::clone(&store),
            opts.index.clone(),
            Arc::clone(&metrics),
        ));
        let cache = Arc::new(TimelineCache::with_metrics(
            opts.cache.clone(),
            Arc::clone(&metrics),
        ));
        let assembler = TimelineAssembler::new(
            Arc::clone(&store),
            Arc::clone(&graph),
            Arc::clone(&cache),
            Arc::clone(&metrics),
            opts.fanout.celebrity_threshold,
        );
        let fanout = FanoutDispatcher::new(
            Arc::clone(&graph),
            Arc::clone(&cache),
            metrics,
            opts.fanout,
        );
        info!(
            celebrity_threshold = opts.fanout.celebrity_threshold,
            segment_depth = opts.cache.depth,
            fanout_mode = ?opts.fanout.mode,
            "service.open"
        );
        Self {
            store,
            graph,
            cache,
            assembler,
            fanout,
            counters,
            opts,
        }
    }

    /// Makes `follower` follow `followee`.
    pub fn follow(&self, follower: UserId, followee: UserId) -> Result<()> {
        self.store.insert_follow(follower, followee)?;
        self.graph.on_follow_changed(follower, followee, true);
        self.cache.invalidate(follower);
        debug!(follower = follower.0, followee = followee.0, "service.follow");
        Ok(())
    }

    /// Removes the edge if present. Returns whether it existed.
    pub fn unfollow(&self, follower: UserId, followee: UserId) -> Result<bool> {
        let removed = self.store.delete_follow(follower, followee)?;
        if removed {
            self.graph.on_follow_changed(follower, followee, false);
            self.cache.invalidate(follower);
        }
        debug!(
            follower = follower.0,
            followee = followee.0,
            removed,
            "service.unfollow"
        );
        Ok(removed)
    }

    /// Stores a tweet and schedules its fan-out.
    ///
    /// Returns once the tweet is durable. Followers' cached timelines pick it
    /// up when fan-out completes (immediately in inline mode).
    pub fn post_tweet(&self, author: UserId, text: &str) -> Result<Tweet> {
        let tweet = self.store.insert_tweet(author, text)?;
        self.fanout.submit(tweet.entry());
        debug!(
            author = author.0,
            tweet = tweet.tweet_id.0,
            "service.post_tweet"
        );
        Ok(tweet)
    }

    /// `user`'s own tweets, newest first.
    pub fn user_tweets(
        &self,
        user: UserId,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<TweetPage> {
        let limit = self.resolve_limit(limit)?;
        let before = decode_cursor(cursor)?;
        let tweets = self.store.list_tweets_by_user(user, before, limit + 1)?;
        Ok(TweetPage::from_lookahead(
            tweets,
            limit,
            PageSource::Storage,
            false,
        ))
    }

    /// One page of `user`'s home timeline under the default deadline.
    pub fn home_timeline(
        &self,
        user: UserId,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<TweetPage> {
        let query = TimelineQuery {
            user,
            cursor: decode_cursor(cursor)?,
            limit: self.resolve_limit(limit)?,
            deadline: self.opts.read_deadline.map(|d| Instant::now() + d),
        };
        self.assembler.home_timeline(&query)
    }

    /// Home-timeline read with an explicit query. The limit is clamped to
    /// the configured maximum.
    pub fn home_timeline_with(&self, mut query: TimelineQuery) -> Result<TweetPage> {
        query.limit = self.resolve_limit(Some(query.limit))?;
        self.assembler.home_timeline(&query)
    }

    /// Blocks until every pending fan-out job has been applied.
    pub fn flush(&self) {
        self.fanout.flush();
    }

    /// Loads the follow sets of `users` into the index.
    pub fn warm(&self, users: &[UserId]) -> Result<usize> {
        self.graph.warm(users)
    }

    /// Drains fan-out and drops all derived state.
    pub fn shutdown(&self) {
        self.fanout.flush();
        self.cache.clear();
        self.graph.clear();
        info!("service.shutdown");
    }

    /// Storage and cache counters.
    pub fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            store: self.store.stats()?,
            index: self.graph.stats(),
            cache: self.cache.stats(),
            fanout_backlog: self.fanout.backlog(),
            metrics: self.counters.as_ref().map(|c| c.snapshot()),
        })
    }

    /// The storage accessor.
    pub fn store(&self) -> &Arc<dyn FeedStore> {
        &self.store
    }

    /// The follow graph index.
    pub fn graph(&self) -> &Arc<FollowGraphIndex> {
        &self.graph
    }

    /// The timeline cache.
    pub fn cache(&self) -> &Arc<TimelineCache> {
        &self.cache
    }

    /// The options the service was built with.
    pub fn options(&self) -> &ServiceOptions {
        &self.opts
    }

    fn resolve_limit(&self, limit: Option<usize>) -> Result<usize> {
        match limit {
            None => Ok(self.opts.default_page_size.min(self.opts.max_page_size)),
            Some(0) => Err(ValidationError::InvalidLimit.into()),
            Some(n) => Ok(n.min(self.opts.max_page_size)),
        }
    }
}

/// The caller's sink, or service-owned counters reported by [`FeedService::stats`].
fn resolve_metrics(opts: &ServiceOptions) -> (Arc<dyn FeedMetrics>, Option<Arc<CounterMetrics>>) {
    match &opts.metrics {
        Some(metrics) => (Arc::clone(metrics), None),
        None => {
            let counters = Arc::new(CounterMetrics::default());
            let sink: Arc<dyn FeedMetrics> = counters.clone();
            (sink, Some(counters))
        }
    }
}

fn decode_cursor(cursor: Option<&str>) -> Result<Option<FeedKey>> {
    cursor.map(cursor::decode_key).transpose()
}
