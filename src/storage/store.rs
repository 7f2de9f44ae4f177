use serde::Serialize;

use crate::types::{FeedKey, Result, Tweet, TweetId, UserId, ValidationError, MAX_TWEET_CHARS};

/// Typed operations against the FOLLOWS and TWEET relations.
///
/// Implementations must be safe to call from many threads at once and must
/// validate input (see [`validate_follow`], [`validate_tweet_text`]) before
/// writing.
pub trait FeedStore: Send + Sync {
    /// Inserts a follow edge. Fails with `SelfFollow` or `DuplicateEdge`.
    fn insert_follow(&self, follower: UserId, followee: UserId) -> Result<()>;

    /// Removes a follow edge. Returns whether an edge was removed.
    fn delete_follow(&self, follower: UserId, followee: UserId) -> Result<bool>;

    /// Users followed by `user`, ascending by id.
    fn list_followees(&self, user: UserId, limit: Option<usize>) -> Result<Vec<UserId>>;

    /// Users following `user`, ascending by id.
    fn list_followers(&self, user: UserId, limit: Option<usize>) -> Result<Vec<UserId>>;

    /// Number of users following `user`.
    fn count_followers(&self, user: UserId) -> Result<usize>;

    /// Stores a tweet and returns it with its generated id and timestamp.
    fn insert_tweet(&self, author: UserId, text: &str) -> Result<Tweet>;

    /// Tweets by `user` strictly after `before` in timeline order, newest first.
    fn list_tweets_by_user(
        &self,
        user: UserId,
        before: Option<FeedKey>,
        limit: usize,
    ) -> Result<Vec<Tweet>>;

    /// Fetches tweets by id. Unknown ids are skipped; order is unspecified.
    fn get_tweets(&self, ids: &[TweetId]) -> Result<Vec<Tweet>>;

    /// Bulk insert that skips existing edges and self-loops. Returns rows inserted.
    fn insert_follows_ignoring_duplicates(&self, edges: &[(UserId, UserId)]) -> Result<u64>;

    /// A uniformly random follower id, or `None` when FOLLOWS is empty.
    fn random_follower(&self) -> Result<Option<UserId>>;

    /// Row counts of both relations.
    fn stats(&self) -> Result<StoreStats>;
}

/// Row counts reported by [`FeedStore::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Rows in FOLLOWS.
    pub follows: u64,
    /// Rows in TWEET.
    pub tweets: u64,
}

/// Rejects self-follows.
pub fn validate_follow(follower: UserId, followee: UserId) -> std::result::Result<(), ValidationError> {
    if follower == followee {
        return Err(ValidationError::SelfFollow);
    }
    Ok(())
}

/// Rejects bodies longer than [`MAX_TWEET_CHARS`] characters.
pub fn validate_tweet_text(text: &str) -> std::result::Result<(), ValidationError> {
    let len = text.chars().count();
    if len > MAX_TWEET_CHARS {
        return Err(ValidationError::TextTooLong {
            len,
            max: MAX_TWEET_CHARS,
        });
    }
    Ok(())
}
