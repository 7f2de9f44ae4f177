//! The persisted schema in SQLite dialect.
//!
//! `TWEET.tweet_id` is declared `INTEGER PRIMARY KEY AUTOINCREMENT`, which is
//! SQLite's 64-bit auto-increment rowid (`BIGINT AUTO_INCREMENT` elsewhere).
//! `tweet_ts` holds `YYYY-MM-DD HH:MM:SS` UTC text, which sorts chronologically.

/// Statements creating both relations and their secondary indexes.
pub const CREATE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS FOLLOWS (
    follower_id INT NOT NULL,
    followee_id INT NOT NULL,
    PRIMARY KEY (follower_id, followee_id)
);

CREATE INDEX IF NOT EXISTS idx_follows_followee ON FOLLOWS (followee_id);

CREATE TABLE IF NOT EXISTS TWEET (
    tweet_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INT NOT NULL,
    tweet_ts DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    tweet_text VARCHAR(140) NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tweet_user_ts ON TWEET (user_id, tweet_ts);
";
