#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use murmur::graph::{FollowGraphIndex, IndexOptions};
use murmur::metrics::CounterMetrics;
use murmur::storage::{FeedStore, SqliteStore};
use murmur::types::{FeedError, UserId, ValidationError};
use murmur::{FeedService, ServiceOptions};

fn ids(raw: &[u64]) -> Vec<UserId> {
    raw.iter().copied().map(UserId).collect()
}

#[test]
fn follow_then_unfollow_restores_prior_state() {
    let svc = FeedService::in_memory().expect("service");
    svc.follow(UserId(1), UserId(2)).expect("follow 2");
    let before_followees = svc.graph().followees(UserId(1)).expect("followees");
    let before_followers = svc.graph().followers(UserId(3)).expect("followers");
    let before_count = svc.graph().follower_count(UserId(3)).expect("count");

    svc.follow(UserId(1), UserId(3)).expect("follow 3");
    assert!(svc.unfollow(UserId(1), UserId(3)).expect("unfollow"));

    assert_eq!(svc.graph().followees(UserId(1)).expect("followees"), before_followees);
    assert_eq!(svc.graph().followers(UserId(3)).expect("followers"), before_followers);
    assert_eq!(svc.graph().follower_count(UserId(3)).expect("count"), before_count);
    assert_eq!(
        svc.store().list_followees(UserId(1), None).expect("storage"),
        ids(&[2])
    );
}

#[test]
fn self_follow_always_fails() {
    let svc = FeedService::in_memory().expect("service");
    for user in [0, 1, 42, u64::from(u32::MAX)] {
        let err = svc.follow(UserId(user), UserId(user)).unwrap_err();
        assert!(matches!(
            err,
            FeedError::Validation(ValidationError::SelfFollow)
        ));
    }
    assert_eq!(svc.stats().expect("stats").store.follows, 0);
}

#[test]
fn index_and_storage_agree_in_both_directions() {
    let store: Arc<dyn FeedStore> = Arc::new(SqliteStore::in_memory().expect("store"));
    let index = FollowGraphIndex::new(Arc::clone(&store), IndexOptions::default());
    for (a, b) in [(1, 2), (1, 3), (2, 3), (4, 3), (3, 1)] {
        store.insert_follow(UserId(a), UserId(b)).expect("insert");
    }
    for user in 1..=4 {
        let followees: Vec<UserId> = index
            .followees(UserId(user))
            .expect("followees")
            .iter()
            .copied()
            .collect();
        assert_eq!(followees, store.list_followees(UserId(user), None).expect("storage"));
        let followers: Vec<UserId> = index
            .followers(UserId(user))
            .expect("followers")
            .iter()
            .copied()
            .collect();
        assert_eq!(followers, store.list_followers(UserId(user), None).expect("storage"));
        assert_eq!(
            index.follower_count(UserId(user)).expect("count"),
            store.count_followers(UserId(user)).expect("storage")
        );
    }
}

#[test]
fn tiny_index_evicts_but_stays_correct() {
    let store: Arc<dyn FeedStore> = Arc::new(SqliteStore::in_memory().expect("store"));
    let metrics = Arc::new(CounterMetrics::default());
    let index = FollowGraphIndex::with_metrics(
        Arc::clone(&store),
        IndexOptions {
            shards: 2,
            capacity: 2,
            count_capacity: 2,
        },
        metrics.clone(),
    );
    for user in 1..=20 {
        store.insert_follow(UserId(user), UserId(100)).expect("insert");
    }
    for user in 1..=20 {
        assert_eq!(
            index.followees(UserId(user)).expect("followees").len(),
            1,
            "user {user}"
        );
    }
    assert!(index.stats().followee_sets <= 2);
    assert_eq!(index.follower_count(UserId(100)).expect("count"), 20);
    assert!(metrics.snapshot().index_misses >= 20);
}

#[test]
fn warm_then_invalidate_rereads_storage() {
    let store: Arc<dyn FeedStore> = Arc::new(SqliteStore::in_memory().expect("store"));
    let index = FollowGraphIndex::new(Arc::clone(&store), IndexOptions::default());
    store.insert_follow(UserId(1), UserId(2)).expect("insert");
    assert_eq!(index.warm(&ids(&[1, 2])).expect("warm"), 2);

    // Written behind the index's back; only an invalidation makes it visible.
    store.insert_follow(UserId(1), UserId(5)).expect("insert");
    assert_eq!(index.followees(UserId(1)).expect("followees").len(), 1);
    index.invalidate(UserId(1));
    assert_eq!(index.followees(UserId(1)).expect("followees").len(), 2);
}

#[test]
fn concurrent_follows_land_in_index_and_storage() {
    let svc = Arc::new(FeedService::open(ServiceOptions::memory().shards(4)).expect("service"));
    let handles: Vec<_> = (0..8u64)
        .map(|worker| {
            let svc = Arc::clone(&svc);
            thread::spawn(move || {
                for followee in 0..25u64 {
                    svc.follow(UserId(1_000 + worker), UserId(followee))
                        .expect("follow");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }
    for followee in 0..25u64 {
        assert_eq!(svc.graph().follower_count(UserId(followee)).expect("count"), 8);
    }
    assert_eq!(svc.stats().expect("stats").store.follows, 200);
}
