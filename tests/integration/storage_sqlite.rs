#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use murmur::metrics::CounterMetrics;
use murmur::storage::{FeedStore, ManualClock, RetryPolicy, SqliteStore, StoreOptions};
use murmur::types::{FeedError, FeedKey, Timestamp, UserId};
use murmur::{FeedService, ServiceOptions};
use rusqlite::Connection;
use tempfile::tempdir;

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

#[test]
fn file_store_survives_reopen() -> murmur::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("nested").join("feed.db");
    let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000)));

    let first_id = {
        let store = SqliteStore::open(StoreOptions::file(&path).clock(clock.clone()))?;
        store.insert_follow(UserId(1), UserId(2))?;
        store.insert_tweet(UserId(2), "persisted")?.tweet_id
    };

    let store = SqliteStore::open(StoreOptions::file(&path).clock(clock.clone()))?;
    let stats = store.stats()?;
    assert_eq!((stats.follows, stats.tweets), (1, 1));
    let tweets = store.list_tweets_by_user(UserId(2), None, 10)?;
    assert_eq!(tweets.len(), 1);
    assert_eq!(tweets[0].tweet_id, first_id);
    assert_eq!(tweets[0].tweet_ts, Timestamp(1_700_000_000));

    // Ids keep growing across sessions.
    let next = store.insert_tweet(UserId(2), "again")?;
    assert!(next.tweet_id > first_id);
    Ok(())
}

#[test]
fn timestamps_are_stored_as_datetime_text() -> murmur::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("feed.db");
    let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000)));
    let store = SqliteStore::open(StoreOptions::file(&path).clock(clock))?;
    store.insert_tweet(UserId(9), "when")?;

    let conn = Connection::open(&path)?;
    let raw: String = conn.query_row("SELECT tweet_ts FROM TWEET", [], |row| row.get(0))?;
    assert_eq!(raw, "2023-11-14 22:13:20");
    Ok(())
}

#[test]
fn cursor_pages_across_equal_timestamps() -> murmur::Result<()> {
    let clock = Arc::new(ManualClock::new(Timestamp(50)));
    let store = SqliteStore::open(StoreOptions::memory().clock(clock.clone()))?;
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(store.insert_tweet(UserId(3), "same second")?.tweet_id);
    }
    clock.set(Timestamp(40));
    let older = store.insert_tweet(UserId(3), "older")?;

    let mut seen = Vec::new();
    let mut before: Option<FeedKey> = None;
    loop {
        let page = store.list_tweets_by_user(UserId(3), before, 2)?;
        let Some(last) = page.last() else { break };
        before = Some(last.key());
        seen.extend(page.iter().map(|t| t.tweet_id));
    }
    ids.reverse();
    ids.push(older.tweet_id);
    assert_eq!(seen, ids);
    Ok(())
}

#[test]
fn locked_database_surfaces_as_unavailable() -> murmur::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("busy.db");
    let metrics = Arc::new(CounterMetrics::default());
    let store = SqliteStore::open(
        StoreOptions::file(&path)
            .pool_size(1)
            .busy_timeout(Duration::from_millis(10))
            .retry(fast_retry(3)),
    )?
    .with_metrics(metrics.clone());

    let blocker = Connection::open(&path)?;
    blocker.execute_batch("BEGIN EXCLUSIVE")?;
    let err = store.insert_tweet(UserId(1), "blocked").unwrap_err();
    assert!(err.is_retryable());
    match err {
        FeedError::StorageUnavailable { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected StorageUnavailable, got {other:?}"),
    }
    assert_eq!(metrics.snapshot().storage_retries, 2);

    blocker.execute_batch("COMMIT")?;
    store.insert_tweet(UserId(1), "unblocked")?;
    assert_eq!(store.stats()?.tweets, 1);
    Ok(())
}

#[test]
fn service_over_file_store_reads_after_restart() -> murmur::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("svc.db");
    {
        let svc = FeedService::open(ServiceOptions::new(StoreOptions::file(&path)))?;
        svc.follow(UserId(1), UserId(2))?;
        svc.post_tweet(UserId(2), "hello")?;
        svc.shutdown();
    }
    let svc = FeedService::open(ServiceOptions::new(StoreOptions::file(&path)))?;
    let page = svc.home_timeline(UserId(1), None, None)?;
    assert_eq!(page.len(), 1);
    assert_eq!(page.tweets[0].tweet_text, "hello");
    Ok(())
}

#[test]
fn concurrent_writers_share_the_pool() -> murmur::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("pool.db");
    let store: Arc<dyn FeedStore> =
        Arc::new(SqliteStore::open(StoreOptions::file(&path).pool_size(4))?);
    let handles: Vec<_> = (0..4u64)
        .map(|worker| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || -> murmur::Result<()> {
                for n in 0..25 {
                    store.insert_tweet(UserId(worker), &format!("{worker}-{n}"))?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer")?;
    }
    assert_eq!(store.stats()?.tweets, 100);
    Ok(())
}
