use std::collections::BTreeSet;
use std::sync::Arc;

use lru::LruCache;
use serde::Serialize;
use tracing::{debug, trace};

use crate::metrics::{default_metrics, FeedMetrics};
use crate::primitives::concurrency::{shard_lru, Sharded};
use crate::storage::FeedStore;
use crate::types::{Result, UserId};

/// Immutable adjacency snapshot handed to readers.
pub type FollowSet = BTreeSet<UserId>;

/// Sizing of the [`FollowGraphIndex`].
#[derive(Clone, Debug)]
pub struct IndexOptions {
    /// Number of independently locked shards.
    pub shards: usize,
    /// Total cached adjacency sets per direction.
    pub capacity: usize,
    /// Total cached follower counts.
    pub count_capacity: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            shards: 16,
            capacity: 16_384,
            count_capacity: 65_536,
        }
    }
}

/// Occupancy of the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Cached followee sets.
    pub followee_sets: usize,
    /// Cached follower sets.
    pub follower_sets: usize,
    /// Cached follower counts.
    pub follower_counts: usize,
}

#[derive(Copy, Clone, Debug)]
enum Direction {
    Followees,
    Followers,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Followees => "followees",
            Direction::Followers => "followers",
        }
    }
}

struct Shard {
    followees: LruCache<UserId, Arc<FollowSet>>,
    followers: LruCache<UserId, Arc<FollowSet>>,
    follower_counts: LruCache<UserId, usize>,
    /// Bumped by every mutation; loads started under an older epoch are not installed.
    epoch: u64,
}

impl Shard {
    fn sets(&mut self, dir: Direction) -> &mut LruCache<UserId, Arc<FollowSet>> {
        match dir {
            Direction::Followees => &mut self.followees,
            Direction::Followers => &mut self.followers,
        }
    }
}

/// Cached follower→followees and followee→followers mapping.
///
/// Readers get `Arc` snapshots and never observe a set mid-update. Mutations
/// copy-on-write the affected sets under the owning shard's lock, so concurrent
/// changes to different edges of one user serialize instead of losing updates.
pub struct FollowGraphIndex {
    store: Arc<dyn FeedStore>,
    shards: Sharded<Shard>,
    metrics: Arc<dyn FeedMetrics>,
}

impl FollowGraphIndex {
    /// Creates an empty index over `store`.
    pub fn new(store: Arc<dyn FeedStore>, opts: IndexOptions) -> Self {
        Self::with_metrics(store, opts, default_metrics())
    }

    /// Creates an empty index reporting to `metrics`.
    pub fn with_metrics(
        store: Arc<dyn FeedStore>,
        opts: IndexOptions,
        metrics: Arc<dyn FeedMetrics>,
    ) -> Self {
        let shard_count = opts.shards.max(1);
        let shards = Sharded::new(shard_count, || Shard {
            followees: shard_lru(opts.capacity, shard_count),
            followers: shard_lru(opts.capacity, shard_count),
            follower_counts: shard_lru(opts.count_capacity, shard_count),
            epoch: 0,
        });
        Self {
            store,
            shards,
            metrics,
        }
    }

    /// Users followed by `user`.
    pub fn followees(&self, user: UserId) -> Result<Arc<FollowSet>> {
        self.lookup(user, Direction::Followees)
    }

    /// Users following `user`.
    pub fn followers(&self, user: UserId) -> Result<Arc<FollowSet>> {
        self.lookup(user, Direction::Followers)
    }

    /// Number of followers of `user`, without materializing the set on a miss.
    pub fn follower_count(&self, user: UserId) -> Result<usize> {
        let epoch = {
            let mut shard = self.shards.for_user(user).lock();
            if let Some(set) = shard.followers.get(&user) {
                let len = set.len();
                self.metrics.index_lookup("count", true);
                return Ok(len);
            }
            if let Some(count) = shard.follower_counts.get(&user) {
                let count = *count;
                self.metrics.index_lookup("count", true);
                return Ok(count);
            }
            shard.epoch
        };
        self.metrics.index_lookup("count", false);
        let count = self.store.count_followers(user)?;
        let mut shard = self.shards.for_user(user).lock();
        if shard.epoch == epoch {
            shard.follower_counts.put(user, count);
        }
        Ok(count)
    }

    /// Applies a follow (`added`) or unfollow to both directions.
    ///
    /// Must run after the storage write and before any timeline invalidation
    /// that depends on it.
    pub fn on_follow_changed(&self, follower: UserId, followee: UserId, added: bool) {
        {
            let mut shard = self.shards.for_user(follower).lock();
            shard.epoch += 1;
            if let Some(set) = shard.followees.get_mut(&follower) {
                apply(Arc::make_mut(set), followee, added);
            }
        }
        {
            let mut shard = self.shards.for_user(followee).lock();
            shard.epoch += 1;
            let cached_len = shard.followers.get_mut(&followee).map(|set| {
                let set = Arc::make_mut(set);
                apply(set, follower, added);
                set.len()
            });
            // A count loaded after the storage write already includes this
            // edge, so without a set to recount from it is dropped, not adjusted.
            match cached_len {
                Some(len) => {
                    shard.follower_counts.put(followee, len);
                }
                None => {
                    shard.follower_counts.pop(&followee);
                }
            }
        }
        trace!(
            follower = follower.0,
            followee = followee.0,
            added,
            "graph.edge_changed"
        );
    }

    /// Loads the followee sets of `users` ahead of their first read.
    pub fn warm(&self, users: &[UserId]) -> Result<usize> {
        for user in users {
            self.followees(*user)?;
        }
        debug!(users = users.len(), "graph.warm");
        Ok(users.len())
    }

    /// Drops everything cached about `user`.
    pub fn invalidate(&self, user: UserId) {
        let mut shard = self.shards.for_user(user).lock();
        shard.epoch += 1;
        shard.followees.pop(&user);
        shard.followers.pop(&user);
        shard.follower_counts.pop(&user);
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.epoch += 1;
            shard.followees.clear();
            shard.followers.clear();
            shard.follower_counts.clear();
        }
        debug!("graph.clear");
    }

    /// Current occupancy.
    pub fn stats(&self) -> IndexStats {
        let mut stats = IndexStats::default();
        for shard in self.shards.iter() {
            let shard = shard.lock();
            stats.followee_sets += shard.followees.len();
            stats.follower_sets += shard.followers.len();
            stats.follower_counts += shard.follower_counts.len();
        }
        stats
    }

    fn lookup(&self, user: UserId, dir: Direction) -> Result<Arc<FollowSet>> {
        let epoch = {
            let mut shard = self.shards.for_user(user).lock();
            if let Some(set) = shard.sets(dir).get(&user) {
                let set = Arc::clone(set);
                self.metrics.index_lookup(dir.label(), true);
                return Ok(set);
            }
            shard.epoch
        };
        self.metrics.index_lookup(dir.label(), false);
        let ids = match dir {
            Direction::Followees => self.store.list_followees(user, None)?,
            Direction::Followers => self.store.list_followers(user, None)?,
        };
        let loaded: Arc<FollowSet> = Arc::new(ids.into_iter().collect());
        let mut shard = self.shards.for_user(user).lock();
        if shard.epoch == epoch {
            shard.sets(dir).put(user, Arc::clone(&loaded));
        } else {
            debug!(user = user.0, direction = dir.label(), "graph.load_raced");
        }
        Ok(loaded)
    }
}

fn apply(set: &mut FollowSet, user: UserId, added: bool) {
    if added {
        set.insert(user);
    } else {
        set.remove(&user);
    }
}
