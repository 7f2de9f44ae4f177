//! Home-timeline assembly.
//!
//! Timelines are derived data. They are built by merging the newest tweets of
//! every source at read time, optionally short-circuited by a cached
//! [`Segment`](cache::Segment) that fan-out on write keeps current for
//! non-celebrity authors.

mod assembler;
/// Cached per-user timeline segments.
pub mod cache;
/// Opaque pagination cursors.
pub mod cursor;
mod fanout;
/// K-way merge of ordered tweet streams.
pub mod merge;

use serde::Serialize;

use crate::types::Tweet;

pub use assembler::{TimelineAssembler, TimelineQuery};
pub use cache::{CacheOptions, CacheStats, Segment, TimelineCache};
pub use cursor::Cursor;
pub use fanout::{FanoutConfig, FanoutDispatcher, FanoutMode};

/// Which path produced a page.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSource {
    /// A cached segment plus live pulls of celebrity authors.
    Cache,
    /// A live merge over every source.
    Merge,
    /// A single author's tweets read straight from storage.
    Storage,
}

impl PageSource {
    /// Label used in metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            PageSource::Cache => "cache",
            PageSource::Merge => "merge",
            PageSource::Storage => "storage",
        }
    }
}

/// One page of tweets, newest first.
#[derive(Clone, Debug, Serialize)]
pub struct TweetPage {
    /// At most `limit` tweets in timeline order.
    pub tweets: Vec<Tweet>,
    /// Resume point for the next page; absent once the timeline is exhausted.
    pub next_cursor: Option<Cursor>,
    /// Path that served the page.
    pub source: PageSource,
    /// Set when a deadline cut the page short. `next_cursor` then resumes
    /// right after the last returned tweet.
    pub partial: bool,
}

impl TweetPage {
    /// Builds a page from `items`, which may hold one lookahead item beyond
    /// `limit`.
    pub fn from_lookahead(
        mut tweets: Vec<Tweet>,
        limit: usize,
        source: PageSource,
        partial: bool,
    ) -> Self {
        let has_more = tweets.len() > limit;
        tweets.truncate(limit);
        let next_cursor = if has_more || partial {
            tweets.last().map(|t| Cursor::from(t.key()))
        } else {
            None
        };
        Self {
            tweets,
            next_cursor,
            source,
            partial,
        }
    }

    /// Number of tweets on the page.
    pub fn len(&self) -> usize {
        self.tweets.len()
    }

    /// Whether the page holds no tweets.
    pub fn is_empty(&self) -> bool {
        self.tweets.is_empty()
    }
}
