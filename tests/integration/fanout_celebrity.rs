#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use murmur::metrics::CounterMetrics;
use murmur::storage::ManualClock;
use murmur::timeline::{FanoutMode, PageSource};
use murmur::types::{Timestamp, UserId};
use murmur::{FeedService, ServiceOptions};

const CELEBRITY: UserId = UserId(1);

/// Users 100..100+fans follow the celebrity; user 100 also follows 2.
fn celebrity_service(
    threshold: usize,
    fans: u64,
    mode: FanoutMode,
) -> (FeedService, Arc<ManualClock>, Arc<CounterMetrics>) {
    let clock = Arc::new(ManualClock::new(Timestamp(0)));
    let metrics = Arc::new(CounterMetrics::default());
    let opts = ServiceOptions::memory()
        .clock(clock.clone())
        .celebrity_threshold(threshold)
        .fanout_mode(mode)
        .read_deadline(None)
        .metrics(metrics.clone());
    let svc = FeedService::open(opts).expect("service");
    for fan in 0..fans {
        svc.follow(UserId(100 + fan), CELEBRITY).expect("follow");
    }
    svc.follow(UserId(100), UserId(2)).expect("follow");
    (svc, clock, metrics)
}

#[test]
fn celebrity_tweets_arrive_by_pull() {
    let (svc, clock, metrics) = celebrity_service(5, 10, FanoutMode::Inline);
    clock.set(Timestamp(1));
    svc.post_tweet(UserId(2), "regular").expect("post");
    let first = svc.home_timeline(UserId(100), None, None).expect("read");
    assert_eq!(first.len(), 1);

    clock.set(Timestamp(2));
    let tweet = svc.post_tweet(CELEBRITY, "famous").expect("post");
    assert_eq!(metrics.snapshot().fanout_skipped, 1);

    // Served from the cached segment, with the celebrity merged in live.
    let page = svc.home_timeline(UserId(100), None, None).expect("read");
    assert_eq!(page.source, PageSource::Cache);
    assert_eq!(page.tweets[0].tweet_id, tweet.tweet_id);
    assert_eq!(page.len(), 2);

    for fan in 101..110 {
        let page = svc.home_timeline(UserId(fan), None, None).expect("read");
        assert_eq!(page.len(), 1, "fan {fan}");
        assert_eq!(page.tweets[0].user_id, CELEBRITY);
    }
}

#[test]
fn crossing_the_threshold_rebuilds_the_segment() {
    let (svc, clock, _) = celebrity_service(3, 2, FanoutMode::Inline);
    clock.set(Timestamp(1));
    svc.post_tweet(CELEBRITY, "before").expect("post");
    assert_eq!(
        svc.home_timeline(UserId(100), None, None).expect("read").len(),
        1
    );
    assert_eq!(
        svc.home_timeline(UserId(100), None, None).expect("read").source,
        PageSource::Cache
    );

    // A third follower turns the author into a pulled source.
    svc.follow(UserId(500), CELEBRITY).expect("follow");
    clock.set(Timestamp(2));
    svc.post_tweet(CELEBRITY, "after").expect("post");

    let page = svc.home_timeline(UserId(100), None, None).expect("read");
    assert_eq!(page.source, PageSource::Merge);
    let texts: Vec<&str> = page.tweets.iter().map(|t| t.tweet_text.as_str()).collect();
    assert_eq!(texts, vec!["after", "before"]);
}

#[test]
fn background_fanout_is_visible_after_flush() {
    let (svc, clock, metrics) = celebrity_service(1_000, 3, FanoutMode::Background);
    clock.set(Timestamp(1));
    svc.post_tweet(CELEBRITY, "warm").expect("post");
    svc.flush();
    for fan in 100..103 {
        svc.home_timeline(UserId(fan), None, None).expect("read");
    }
    assert_eq!(svc.stats().expect("stats").cache.segments, 3);

    for ts in 2..12 {
        clock.set(Timestamp(ts));
        svc.post_tweet(CELEBRITY, &format!("t{ts}")).expect("post");
    }
    svc.flush();
    assert_eq!(svc.stats().expect("stats").fanout_backlog, 0);
    assert!(metrics.snapshot().fanout_segment_pushes >= 30);

    for fan in 100..103 {
        let page = svc.home_timeline(UserId(fan), None, Some(20)).expect("read");
        assert_eq!(page.source, PageSource::Cache);
        assert_eq!(page.len(), 11);
        assert_eq!(page.tweets[0].tweet_text, "t11");
    }
}

#[test]
fn concurrent_posts_and_reads_converge() {
    let (svc, clock, _) = celebrity_service(1_000, 4, FanoutMode::Background);
    clock.set(Timestamp(1));
    let svc = Arc::new(svc);
    let writer = {
        let svc = Arc::clone(&svc);
        thread::spawn(move || {
            for n in 0..50 {
                svc.post_tweet(CELEBRITY, &format!("n{n}")).expect("post");
            }
        })
    };
    let readers: Vec<_> = (100..104u64)
        .map(|fan| {
            let svc = Arc::clone(&svc);
            thread::spawn(move || {
                for _ in 0..20 {
                    let page = svc
                        .home_timeline(UserId(fan), None, Some(50))
                        .expect("read");
                    let ids: Vec<u64> = page.tweets.iter().map(|t| t.tweet_id.0).collect();
                    let mut sorted = ids.clone();
                    sorted.sort_unstable_by(|a, b| b.cmp(a));
                    sorted.dedup();
                    assert_eq!(ids, sorted, "page must be strictly newest first");
                }
            })
        })
        .collect();
    writer.join().expect("writer");
    for reader in readers {
        reader.join().expect("reader");
    }
    svc.flush();
    for fan in 100..104u64 {
        let page = svc.home_timeline(UserId(fan), None, Some(100)).expect("read");
        assert_eq!(page.len(), 50, "fan {fan}");
    }
}
