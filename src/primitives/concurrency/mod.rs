use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::types::UserId;

/// Fixed set of independently locked shards keyed by user id.
///
/// Every per-user cache in the service is split this way so that unrelated
/// users never contend on the same lock.
pub struct Sharded<S> {
    shards: Vec<Mutex<S>>,
}

impl<S> Sharded<S> {
    /// Builds `count` shards (at least one) using `init`.
    pub fn new(count: usize, mut init: impl FnMut() -> S) -> Self {
        let count = count.max(1);
        let mut shards = Vec::with_capacity(count);
        for _ in 0..count {
            shards.push(Mutex::new(init()));
        }
        Self { shards }
    }

    /// The shard owning `user`.
    pub fn for_user(&self, user: UserId) -> &Mutex<S> {
        let idx = (user.0 % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    /// All shards, in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Mutex<S>> {
        self.shards.iter()
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Always false; a `Sharded` holds at least one shard.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// Splits `capacity` across `shards`, giving every shard room for one entry.
pub fn per_shard_capacity(capacity: usize, shards: usize) -> NonZeroUsize {
    NonZeroUsize::new((capacity / shards.max(1)).max(1)).unwrap_or(NonZeroUsize::MIN)
}

/// LRU sized with [`per_shard_capacity`].
pub fn shard_lru<K: std::hash::Hash + Eq, V>(capacity: usize, shards: usize) -> LruCache<K, V> {
    LruCache::new(per_shard_capacity(capacity, shards))
}
