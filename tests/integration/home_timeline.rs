#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Instant;

use murmur::storage::ManualClock;
use murmur::timeline::cursor;
use murmur::timeline::{FanoutMode, PageSource, TimelineQuery, TweetPage};
use murmur::types::{FeedError, Timestamp, Tweet, TweetId, UserId, ValidationError};
use murmur::{FeedService, ServiceOptions};
use proptest::prelude::*;

struct Harness {
    svc: FeedService,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with(ServiceOptions::memory())
    }

    fn with(opts: ServiceOptions) -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp(0)));
        let opts = opts
            .clock(clock.clone())
            .fanout_mode(FanoutMode::Inline)
            .read_deadline(None);
        Self {
            svc: FeedService::open(opts).expect("service"),
            clock,
        }
    }

    fn post_at(&self, author: u64, ts: i64) -> Tweet {
        self.clock.set(Timestamp(ts));
        self.svc
            .post_tweet(UserId(author), &format!("{author}@{ts}"))
            .expect("post")
    }

    fn page(&self, user: u64, cursor: Option<&str>, limit: usize) -> TweetPage {
        self.svc
            .home_timeline(UserId(user), cursor, Some(limit))
            .expect("timeline")
    }

    fn walk(&self, user: u64, limit: usize) -> Vec<TweetId> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.page(user, cursor.as_deref(), limit);
            out.extend(page.tweets.iter().map(|t| t.tweet_id));
            match page.next_cursor {
                Some(next) => cursor = Some(next.to_string()),
                None => return out,
            }
        }
    }
}

fn stamps(page: &TweetPage) -> Vec<(i64, u64)> {
    page.tweets
        .iter()
        .map(|t| (t.tweet_ts.0, t.user_id.0))
        .collect()
}

#[test]
fn followees_merge_newest_first() {
    let h = Harness::new();
    h.svc.follow(UserId(1), UserId(10)).expect("follow A");
    h.svc.follow(UserId(1), UserId(20)).expect("follow B");
    h.post_at(10, 10);
    h.post_at(20, 15);
    h.post_at(10, 20);

    let page = h.page(1, None, 10);
    assert_eq!(stamps(&page), vec![(20, 10), (15, 20), (10, 10)]);
    assert!(page.next_cursor.is_none());
}

#[test]
fn chained_single_item_pages_match_one_large_page() {
    let h = Harness::new();
    h.svc.follow(UserId(1), UserId(10)).expect("follow A");
    h.svc.follow(UserId(1), UserId(20)).expect("follow B");
    h.post_at(10, 10);
    h.post_at(20, 15);
    h.post_at(10, 20);

    let whole: Vec<TweetId> = h.page(1, None, 3).tweets.iter().map(|t| t.tweet_id).collect();
    let mut chained = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..3 {
        let page = h.page(1, cursor.as_deref(), 1);
        assert_eq!(page.len(), 1);
        chained.push(page.tweets[0].tweet_id);
        cursor = page.next_cursor.map(|c| c.to_string());
    }
    assert_eq!(chained, whole);
    assert!(cursor.is_none(), "last page must not carry a cursor");
}

#[test]
fn lonely_user_gets_empty_page_without_cursor() {
    let h = Harness::new();
    h.post_at(5, 1);
    let page = h.page(1, None, 10);
    assert!(page.is_empty());
    assert!(page.next_cursor.is_none());
    assert!(!page.partial);
}

#[test]
fn own_tweets_are_part_of_the_timeline() {
    let h = Harness::new();
    h.svc.follow(UserId(1), UserId(2)).expect("follow");
    h.post_at(1, 5);
    h.post_at(2, 6);
    assert_eq!(stamps(&h.page(1, None, 10)), vec![(6, 2), (5, 1)]);
}

#[test]
fn tweet_length_boundary() {
    let h = Harness::new();
    let ok = "é".repeat(140);
    let tweet = h.svc.post_tweet(UserId(1), &ok).expect("140 chars");
    assert_eq!(tweet.tweet_text.chars().count(), 140);

    let err = h.svc.post_tweet(UserId(1), &"a".repeat(141)).unwrap_err();
    assert!(matches!(
        err,
        FeedError::Validation(ValidationError::TextTooLong { len: 141, max: 140 })
    ));
}

#[test]
fn corrupted_cursors_are_rejected() {
    let h = Harness::new();
    h.svc.follow(UserId(1), UserId(2)).expect("follow");
    for ts in 1..=3 {
        h.post_at(2, ts);
    }
    let cursor = h.page(1, None, 1).next_cursor.expect("cursor").to_string();

    let mut flipped = cursor.clone().into_bytes();
    let last = flipped.len() - 1;
    flipped[last] = if flipped[last] == b'A' { b'B' } else { b'A' };
    let flipped = String::from_utf8(flipped).expect("ascii");

    for bad in [
        "",
        "!!!!",
        "AAAA",
        &cursor[..cursor.len() - 2],
        flipped.as_str(),
        "x".repeat(500).as_str(),
    ] {
        match h.svc.home_timeline(UserId(1), Some(bad), Some(1)) {
            Err(FeedError::InvalidCursor(_)) => {}
            other => panic!("cursor {bad:?}: expected InvalidCursor, got {other:?}"),
        }
    }
}

#[test]
fn well_framed_cursors_outside_datetime_range_are_rejected() {
    let h = Harness::new();
    h.svc.follow(UserId(1), UserId(2)).expect("follow");
    h.post_at(2, 1);
    for ts in [i64::MAX, i64::MIN] {
        let crafted = cursor::encode(Timestamp(ts), TweetId(1));
        match h.svc.home_timeline(UserId(1), Some(crafted.as_str()), Some(5)) {
            Err(FeedError::InvalidCursor(_)) => {}
            other => panic!("home timeline at ts {ts}: got {other:?}"),
        }
        match h.svc.user_tweets(UserId(2), Some(crafted.as_str()), Some(5)) {
            Err(FeedError::InvalidCursor(_)) => {}
            other => panic!("user tweets at ts {ts}: got {other:?}"),
        }
    }
}

#[test]
fn cached_and_merged_pages_agree() {
    let h = Harness::new();
    for followee in 10..14 {
        h.svc.follow(UserId(1), UserId(followee)).expect("follow");
    }
    for ts in 0..40 {
        h.post_at(10 + (ts as u64 % 4), ts);
    }
    let merged = h.page(1, None, 15);
    assert_eq!(merged.source, PageSource::Merge);
    let cached = h.page(1, None, 15);
    assert_eq!(cached.source, PageSource::Cache);
    assert_eq!(merged.tweets, cached.tweets);
    assert_eq!(
        merged.next_cursor.as_ref().map(|c| c.to_string()),
        cached.next_cursor.as_ref().map(|c| c.to_string())
    );

    // A pure pull service sees exactly the same timeline.
    let pull = Harness::with(ServiceOptions::memory().celebrity_threshold(1));
    for followee in 10..14 {
        pull.svc.follow(UserId(1), UserId(followee)).expect("follow");
    }
    for ts in 0..40 {
        pull.post_at(10 + (ts as u64 % 4), ts);
    }
    let pulled: Vec<(i64, u64)> = stamps(&pull.page(1, None, 15));
    assert_eq!(pulled, stamps(&cached));
}

#[test]
fn follow_invalidates_the_segment() {
    let h = Harness::new();
    h.svc.follow(UserId(1), UserId(2)).expect("follow");
    h.post_at(2, 1);
    h.post_at(3, 2);
    assert_eq!(stamps(&h.page(1, None, 10)), vec![(1, 2)]);
    assert_eq!(h.page(1, None, 10).source, PageSource::Cache);

    h.svc.follow(UserId(1), UserId(3)).expect("follow new");
    let page = h.page(1, None, 10);
    assert_eq!(page.source, PageSource::Merge);
    assert_eq!(stamps(&page), vec![(2, 3), (1, 2)]);

    assert!(h.svc.unfollow(UserId(1), UserId(3)).expect("unfollow"));
    assert_eq!(stamps(&h.page(1, None, 10)), vec![(1, 2)]);
}

#[test]
fn pushed_tweets_show_up_in_cached_segments() {
    let h = Harness::new();
    h.svc.follow(UserId(1), UserId(2)).expect("follow");
    h.post_at(2, 1);
    h.page(1, None, 10);
    h.post_at(2, 2);
    let page = h.page(1, None, 10);
    assert_eq!(page.source, PageSource::Cache);
    assert_eq!(stamps(&page), vec![(2, 2), (1, 2)]);
}

#[test]
fn expired_deadline_times_out_without_caching() {
    let h = Harness::new();
    h.svc.follow(UserId(1), UserId(2)).expect("follow");
    h.post_at(2, 1);
    let query = TimelineQuery {
        deadline: Some(Instant::now()),
        ..TimelineQuery::first_page(UserId(1), 10)
    };
    let err = h.svc.home_timeline_with(query).unwrap_err();
    assert!(matches!(err, FeedError::Timeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.svc.stats().expect("stats").cache.segments, 0);

    let page = h.page(1, None, 10);
    assert_eq!(page.source, PageSource::Merge);
    assert_eq!(page.len(), 1);
}

#[test]
fn same_second_tweets_break_ties_on_id() {
    let h = Harness::new();
    h.svc.follow(UserId(1), UserId(2)).expect("follow");
    h.svc.follow(UserId(1), UserId(3)).expect("follow");
    let a = h.post_at(2, 7);
    let b = h.post_at(3, 7);
    let c = h.post_at(2, 7);
    assert_eq!(h.walk(1, 1), vec![c.tweet_id, b.tweet_id, a.tweet_id]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_page_size_walks_the_same_timeline(
        posts in prop::collection::vec((0u64..5, 0i64..30), 0..60),
        limit in 1usize..8,
        threshold in 1usize..4,
    ) {
        let h = Harness::with(ServiceOptions::memory().celebrity_threshold(threshold).segment_depth(6));
        for followee in 0u64..5 {
            if followee != 2 {
                h.svc.follow(UserId(100), UserId(followee)).expect("follow");
            }
        }
        // Extra followers push some authors over the threshold.
        for extra in 0..3u64 {
            h.svc.follow(UserId(200 + extra), UserId(extra)).expect("follow");
        }
        let mut expected: Vec<(i64, u64, u64)> = Vec::new();
        for (author, ts) in &posts {
            let tweet = h.post_at(*author, *ts);
            if *author != 2 {
                expected.push((tweet.tweet_ts.0, tweet.tweet_id.0, *author));
            }
        }
        expected.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        let expected: Vec<TweetId> = expected.into_iter().map(|(_, id, _)| TweetId(id)).collect();

        prop_assert_eq!(h.walk(100, limit), expected.clone());
        // Again, now that segments are warm.
        prop_assert_eq!(h.walk(100, limit), expected);
    }
}
