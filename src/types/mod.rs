//! Identifiers, ordering keys, and the error taxonomy shared by every layer.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Checksums used by the cursor codec.
pub mod checksum;

/// Maximum tweet length, counted in Unicode scalar values.
pub const MAX_TWEET_CHARS: usize = 140;

/// Opaque user identifier. The schema has no user table, so ids are never
/// checked for existence.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// Tweet identifier assigned by storage; strictly increasing.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TweetId(pub u64);

/// Tweet timestamp as whole seconds since the Unix epoch (UTC).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TweetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "@{}", self.0),
        }
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        UserId(value)
    }
}

impl From<UserId> for u64 {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl From<u64> for TweetId {
    fn from(value: u64) -> Self {
        TweetId(value)
    }
}

impl Timestamp {
    /// Whether the timestamp falls in `0000-01-01 00:00:00` through
    /// `9999-12-31 23:59:59`, the range a `DATETIME` literal can hold.
    pub fn fits_datetime(self) -> bool {
        OffsetDateTime::from_unix_timestamp(self.0).is_ok_and(|dt| dt.year() >= 0)
    }

    /// Formats the timestamp as a SQL `DATETIME` literal (`YYYY-MM-DD HH:MM:SS`, UTC).
    pub fn to_datetime(self) -> Result<String> {
        let dt = OffsetDateTime::from_unix_timestamp(self.0)
            .map_err(|_| FeedError::Corruption(format!("timestamp {} out of range", self.0)))?;
        dt.format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .map_err(|err| FeedError::Corruption(format!("timestamp {}: {err}", self.0)))
    }

    /// Parses a SQL `DATETIME` literal written by [`Timestamp::to_datetime`] or by
    /// SQLite's `CURRENT_TIMESTAMP`.
    pub fn parse_datetime(text: &str) -> Result<Self> {
        let parsed = PrimitiveDateTime::parse(
            text,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        )
        .map_err(|err| FeedError::Corruption(format!("stored tweet_ts '{text}': {err}")))?;
        Ok(Timestamp(parsed.assume_utc().unix_timestamp()))
    }
}

/// Composite `(tweet_ts, tweet_id)` ordering key.
///
/// `Ord` sorts *newest first*: a key compares `Less` when it belongs earlier in a
/// timeline. This comparator is the only ranking hook in the merge path.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct FeedKey {
    /// Creation time of the tweet.
    pub ts: Timestamp,
    /// Tie-breaker for tweets sharing a second.
    pub id: TweetId,
}

impl FeedKey {
    /// Builds a key from its parts.
    pub fn new(ts: Timestamp, id: TweetId) -> Self {
        Self { ts, id }
    }

    /// Returns true when `self` lies strictly after `cursor` in timeline order,
    /// i.e. is older than the last entry the cursor has seen.
    pub fn is_after(&self, cursor: &FeedKey) -> bool {
        self > cursor
    }
}

impl Ord for FeedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ts
            .cmp(&self.ts)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for FeedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A stored tweet.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    /// Storage-assigned id.
    pub tweet_id: TweetId,
    /// Author.
    pub user_id: UserId,
    /// Server-assigned creation time.
    pub tweet_ts: Timestamp,
    /// Body, at most [`MAX_TWEET_CHARS`] characters.
    pub tweet_text: String,
}

impl Tweet {
    /// Ordering key of this tweet.
    pub fn key(&self) -> FeedKey {
        FeedKey::new(self.tweet_ts, self.tweet_id)
    }

    /// Projects the tweet onto a timeline entry.
    pub fn entry(&self) -> TimelineEntry {
        TimelineEntry {
            tweet_id: self.tweet_id,
            author_id: self.user_id,
            tweet_ts: self.tweet_ts,
        }
    }
}

/// Derived, never persisted timeline row.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Referenced tweet.
    pub tweet_id: TweetId,
    /// Author of the referenced tweet.
    pub author_id: UserId,
    /// Creation time of the referenced tweet.
    pub tweet_ts: Timestamp,
}

impl TimelineEntry {
    /// Ordering key of this entry.
    pub fn key(&self) -> FeedKey {
        FeedKey::new(self.tweet_ts, self.tweet_id)
    }
}

/// Input rejected before reaching storage.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A user tried to follow themselves.
    #[error("a user cannot follow themselves")]
    SelfFollow,
    /// Tweet body exceeds the character limit.
    #[error("tweet text is {len} characters, limit is {max}")]
    TextTooLong {
        /// Characters supplied.
        len: usize,
        /// Characters allowed.
        max: usize,
    },
    /// Page size of zero.
    #[error("page limit must be at least 1")]
    InvalidLimit,
}

/// Error type for every feed operation.
#[derive(thiserror::Error, Debug)]
pub enum FeedError {
    /// Input validation failed.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The follow edge already exists.
    #[error("user {follower} already follows {followee}")]
    DuplicateEdge {
        /// Following user.
        follower: UserId,
        /// Followed user.
        followee: UserId,
    },
    /// A pagination cursor could not be decoded.
    #[error("invalid cursor: {0}")]
    InvalidCursor(&'static str),
    /// A read exceeded its deadline.
    #[error("timeline read timed out after {elapsed:?}")]
    Timeout {
        /// Time spent before giving up.
        elapsed: Duration,
    },
    /// Storage kept failing with transient errors.
    #[error("storage unavailable after {attempts} attempts: {message}")]
    StorageUnavailable {
        /// Attempts made, including the first.
        attempts: u32,
        /// Last transient error.
        message: String,
    },
    /// Non-transient storage failure.
    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),
    /// Stored data could not be interpreted.
    #[error("corruption: {0}")]
    Corruption(String),
    /// I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;

impl FeedError {
    /// Whether the caller may retry the request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::StorageUnavailable { .. } | FeedError::Timeout { .. }
        )
    }
}
