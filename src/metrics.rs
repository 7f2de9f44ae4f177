use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Trait for tracking cache behaviour and timeline work across the service.
///
/// Implementations collect statistics about index lookups, segment reuse, merges
/// and fan-out. They are called on hot paths and must not block.
pub trait FeedMetrics: Send + Sync {
    /// Records a follow-graph index lookup.
    ///
    /// # Parameters
    /// * `direction` - `"followees"`, `"followers"`, or `"count"`.
    /// * `hit` - Whether the cached value was used.
    fn index_lookup(&self, direction: &'static str, hit: bool);

    /// Records a home-timeline read and the path that served it.
    ///
    /// # Parameters
    /// * `source` - `"cache"` for the push path, `"merge"` for the pull path.
    fn timeline_served(&self, source: &'static str);

    /// Records a K-way merge over `sources` streams.
    fn pull_merge(&self, sources: usize);

    /// Records a tweet pushed into `segments` cached segments.
    fn fanout_pushed(&self, segments: usize);

    /// Records a tweet whose author was above the celebrity threshold.
    fn fanout_skipped(&self);

    /// Records a segment install attempt.
    fn segment_installed(&self, installed: bool);

    /// Records a read that hit its deadline.
    fn deadline_exceeded(&self, partial: bool);

    /// Records a transient storage failure that is about to be retried.
    fn storage_retry(&self, op: &'static str);
}

/// A no-op implementation of [`FeedMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl FeedMetrics for NoopMetrics {
    fn index_lookup(&self, _direction: &'static str, _hit: bool) {}
    fn timeline_served(&self, _source: &'static str) {}
    fn pull_merge(&self, _sources: usize) {}
    fn fanout_pushed(&self, _segments: usize) {}
    fn fanout_skipped(&self) {}
    fn segment_installed(&self, _installed: bool) {}
    fn deadline_exceeded(&self, _partial: bool) {}
    fn storage_retry(&self, _op: &'static str) {}
}

/// A thread-safe counter-based implementation of [`FeedMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Index lookups answered from cache.
    pub index_hits: AtomicU64,
    /// Index lookups that went to storage.
    pub index_misses: AtomicU64,
    /// Timelines served from a cached segment.
    pub timelines_from_cache: AtomicU64,
    /// Timelines served by a live merge.
    pub timelines_from_merge: AtomicU64,
    /// Live merges performed.
    pub pull_merges: AtomicU64,
    /// Streams consumed by live merges.
    pub pull_merge_sources: AtomicU64,
    /// Tweets fanned out on write.
    pub fanout_tweets: AtomicU64,
    /// Segment pushes performed by fan-out.
    pub fanout_segment_pushes: AtomicU64,
    /// Tweets not fanned out because the author is a celebrity.
    pub fanout_skipped: AtomicU64,
    /// Rebuilt segments installed.
    pub segments_installed: AtomicU64,
    /// Rebuilt segments discarded because of concurrent writes.
    pub segments_discarded: AtomicU64,
    /// Reads that failed with a timeout.
    pub timeouts: AtomicU64,
    /// Reads that returned a partial page at their deadline.
    pub partial_pages: AtomicU64,
    /// Storage operations retried after `SQLITE_BUSY` or `SQLITE_LOCKED`.
    pub storage_retries: AtomicU64,
}

/// Point-in-time copy of [`CounterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// See [`CounterMetrics::index_hits`].
    pub index_hits: u64,
    /// See [`CounterMetrics::index_misses`].
    pub index_misses: u64,
    /// See [`CounterMetrics::timelines_from_cache`].
    pub timelines_from_cache: u64,
    /// See [`CounterMetrics::timelines_from_merge`].
    pub timelines_from_merge: u64,
    /// See [`CounterMetrics::pull_merges`].
    pub pull_merges: u64,
    /// See [`CounterMetrics::pull_merge_sources`].
    pub pull_merge_sources: u64,
    /// See [`CounterMetrics::fanout_tweets`].
    pub fanout_tweets: u64,
    /// See [`CounterMetrics::fanout_segment_pushes`].
    pub fanout_segment_pushes: u64,
    /// See [`CounterMetrics::fanout_skipped`].
    pub fanout_skipped: u64,
    /// See [`CounterMetrics::segments_installed`].
    pub segments_installed: u64,
    /// See [`CounterMetrics::segments_discarded`].
    pub segments_discarded: u64,
    /// See [`CounterMetrics::timeouts`].
    pub timeouts: u64,
    /// See [`CounterMetrics::partial_pages`].
    pub partial_pages: u64,
    /// See [`CounterMetrics::storage_retries`].
    pub storage_retries: u64,
}

impl CounterMetrics {
    /// Reads every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            index_hits: load(&self.index_hits),
            index_misses: load(&self.index_misses),
            timelines_from_cache: load(&self.timelines_from_cache),
            timelines_from_merge: load(&self.timelines_from_merge),
            pull_merges: load(&self.pull_merges),
            pull_merge_sources: load(&self.pull_merge_sources),
            fanout_tweets: load(&self.fanout_tweets),
            fanout_segment_pushes: load(&self.fanout_segment_pushes),
            fanout_skipped: load(&self.fanout_skipped),
            segments_installed: load(&self.segments_installed),
            segments_discarded: load(&self.segments_discarded),
            timeouts: load(&self.timeouts),
            partial_pages: load(&self.partial_pages),
            storage_retries: load(&self.storage_retries),
        }
    }
}

impl FeedMetrics for CounterMetrics {
    fn index_lookup(&self, _direction: &'static str, hit: bool) {
        if hit {
            self.index_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.index_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn timeline_served(&self, source: &'static str) {
        match source {
            "cache" => {
                self.timelines_from_cache.fetch_add(1, Ordering::Relaxed);
            }
            "merge" => {
                self.timelines_from_merge.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn pull_merge(&self, sources: usize) {
        self.pull_merges.fetch_add(1, Ordering::Relaxed);
        self.pull_merge_sources
            .fetch_add(sources as u64, Ordering::Relaxed);
    }

    fn fanout_pushed(&self, segments: usize) {
        self.fanout_tweets.fetch_add(1, Ordering::Relaxed);
        self.fanout_segment_pushes
            .fetch_add(segments as u64, Ordering::Relaxed);
    }

    fn fanout_skipped(&self) {
        self.fanout_skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn segment_installed(&self, installed: bool) {
        if installed {
            self.segments_installed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.segments_discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn deadline_exceeded(&self, partial: bool) {
        if partial {
            self.partial_pages.fetch_add(1, Ordering::Relaxed);
        } else {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn storage_retry(&self, _op: &'static str) {
        self.storage_retries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`], which has zero overhead
/// as it discards all recorded metrics.
pub fn default_metrics() -> Arc<dyn FeedMetrics> {
    Arc::new(NoopMetrics)
}
