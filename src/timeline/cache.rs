use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use tracing::{debug, trace};

use crate::metrics::{default_metrics, FeedMetrics};
use crate::primitives::concurrency::{shard_lru, Sharded};
use crate::types::{FeedKey, TimelineEntry, UserId};

/// Sizing and freshness of the [`TimelineCache`].
#[derive(Clone, Debug)]
pub struct CacheOptions {
    /// Number of independently locked shards.
    pub shards: usize,
    /// Total cached segments.
    pub capacity: usize,
    /// Entries kept per segment.
    pub depth: usize,
    /// Segments older than this are ignored and dropped.
    pub max_staleness: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            shards: 16,
            capacity: 4_096,
            depth: 200,
            max_staleness: Duration::from_secs(300),
        }
    }
}

/// Cached, bounded prefix of one user's home timeline restricted to pushed
/// authors.
#[derive(Clone, Debug)]
pub struct Segment {
    entries: Vec<TimelineEntry>,
    complete: bool,
    pulled_authors: BTreeSet<UserId>,
    built_at: Instant,
}

impl Segment {
    /// Builds a segment from entries already in timeline order.
    ///
    /// `complete` means the entries are the entire history of the pushed
    /// authors; `pulled_authors` is the celebrity partition the segment was
    /// built against.
    pub fn new(
        entries: Vec<TimelineEntry>,
        complete: bool,
        pulled_authors: BTreeSet<UserId>,
    ) -> Self {
        Self {
            entries,
            complete,
            pulled_authors,
            built_at: Instant::now(),
        }
    }

    /// All entries, newest first.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Whether nothing older than the last entry exists for the pushed authors.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Authors excluded from pushes when the segment was built.
    pub fn pulled_authors(&self) -> &BTreeSet<UserId> {
        &self.pulled_authors
    }

    /// Time since the segment was built.
    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    /// Entries strictly after `cursor` in timeline order.
    pub fn after(&self, cursor: Option<&FeedKey>) -> &[TimelineEntry] {
        match cursor {
            None => &self.entries,
            Some(cursor) => {
                let start = self.entries.partition_point(|e| e.key() <= *cursor);
                &self.entries[start..]
            }
        }
    }

    /// Copy of this segment with `entry` inserted in order, or `None` if it is
    /// already present or would fall off the end of a full segment.
    fn with_entry(&self, entry: TimelineEntry, depth: usize) -> Option<Segment> {
        let key = entry.key();
        let pos = self.entries.partition_point(|e| e.key() < key);
        if self.entries.get(pos).map(|e| e.key()) == Some(key) {
            return None;
        }
        // Past the tail of a truncated segment there may be older tweets missing.
        if pos >= depth || (pos == self.entries.len() && !self.complete) {
            return None;
        }
        let mut next = self.clone();
        next.entries.insert(pos, entry);
        if next.entries.len() > depth {
            next.entries.truncate(depth);
            next.complete = false;
        }
        Some(next)
    }
}

/// Proof that a rebuild started at a given shard epoch.
#[derive(Debug, Clone, Copy)]
pub struct RebuildTicket {
    user: UserId,
    epoch: u64,
}

/// Occupancy of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Cached segments.
    pub segments: usize,
    /// Entries across all cached segments.
    pub entries: usize,
}

struct CacheShard {
    segments: LruCache<UserId, Arc<Segment>>,
    /// Bumped by pushes and invalidations; rebuilds started earlier are not installed.
    epoch: u64,
}

/// Per-user timeline segments kept warm by fan-out on write.
///
/// Segments are immutable once shared; every change swaps in a new
/// `Arc<Segment>` under the shard lock.
pub struct TimelineCache {
    shards: Sharded<CacheShard>,
    depth: usize,
    max_staleness: Duration,
    metrics: Arc<dyn FeedMetrics>,
}

impl TimelineCache {
    /// Creates an empty cache.
    pub fn new(opts: CacheOptions) -> Self {
        Self::with_metrics(opts, default_metrics())
    }

    /// Creates an empty cache reporting to `metrics`.
    pub fn with_metrics(opts: CacheOptions, metrics: Arc<dyn FeedMetrics>) -> Self {
        let shard_count = opts.shards.max(1);
        let shards = Sharded::new(shard_count, || CacheShard {
            segments: shard_lru(opts.capacity, shard_count),
            epoch: 0,
        });
        Self {
            shards,
            depth: opts.depth.max(1),
            max_staleness: opts.max_staleness,
            metrics,
        }
    }

    /// Entries kept per segment.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The fresh segment of `user`, if any. Stale segments are dropped.
    pub fn get(&self, user: UserId) -> Option<Arc<Segment>> {
        let mut shard = self.shards.for_user(user).lock();
        let segment = shard.segments.get(&user).map(Arc::clone)?;
        if segment.age() > self.max_staleness {
            shard.segments.pop(&user);
            shard.epoch += 1;
            trace!(user = user.0, "timeline.cache.stale");
            return None;
        }
        Some(segment)
    }

    /// Marks the start of a rebuild for `user`.
    pub fn begin_rebuild(&self, user: UserId) -> RebuildTicket {
        let shard = self.shards.for_user(user).lock();
        RebuildTicket {
            user,
            epoch: shard.epoch,
        }
    }

    /// Installs a rebuilt segment unless its shard changed since `ticket`.
    pub fn install(&self, ticket: RebuildTicket, segment: Segment) -> bool {
        let mut shard = self.shards.for_user(ticket.user).lock();
        let installed = shard.epoch == ticket.epoch;
        if installed {
            shard.segments.put(ticket.user, Arc::new(segment));
        } else {
            debug!(user = ticket.user.0, "timeline.cache.install_raced");
        }
        self.metrics.segment_installed(installed);
        installed
    }

    /// Pushes `entry` into the cached segments of `users`. Users without a
    /// cached segment are skipped. Returns the number of segments updated.
    pub fn push(&self, users: impl IntoIterator<Item = UserId>, entry: TimelineEntry) -> usize {
        let mut updated = 0;
        for user in users {
            let mut shard = self.shards.for_user(user).lock();
            shard.epoch += 1;
            let next = shard
                .segments
                .peek(&user)
                .and_then(|segment| segment.with_entry(entry, self.depth));
            if let Some(next) = next {
                shard.segments.put(user, Arc::new(next));
                updated += 1;
            }
        }
        trace!(tweet = entry.tweet_id.0, updated, "timeline.cache.push");
        updated
    }

    /// Drops the segment of `user`.
    pub fn invalidate(&self, user: UserId) {
        let mut shard = self.shards.for_user(user).lock();
        shard.epoch += 1;
        shard.segments.pop(&user);
    }

    /// Drops every segment.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.epoch += 1;
            shard.segments.clear();
        }
        debug!("timeline.cache.clear");
    }

    /// Current occupancy.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for shard in self.shards.iter() {
            let shard = shard.lock();
            stats.segments += shard.segments.len();
            stats.entries += shard
                .segments
                .iter()
                .map(|(_, segment)| segment.entries.len())
                .sum::<usize>();
        }
        stats
    }
}
