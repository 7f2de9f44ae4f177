//! Low-level building blocks shared by the caches.

/// Sharded locking and LRU sizing helpers.
///
/// Per-user state is partitioned into independently locked shards.
pub mod concurrency;
