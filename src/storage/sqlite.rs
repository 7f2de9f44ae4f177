use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use super::clock::Clock;
use super::options::{StoreLocation, StoreOptions};
use super::retry::RetryPolicy;
use super::schema::CREATE_SCHEMA;
use super::store::{validate_follow, validate_tweet_text, FeedStore, StoreStats};
use crate::metrics::{default_metrics, FeedMetrics};
use crate::types::{FeedError, FeedKey, Result, Timestamp, Tweet, TweetId, UserId};

/// Maximum bound parameters per `IN (...)` lookup.
const HYDRATE_CHUNK: usize = 500;

/// SQLite-backed [`FeedStore`].
pub struct SqliteStore {
    pool: ConnectionPool,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    metrics: Arc<dyn FeedMetrics>,
}

struct ConnectionPool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ConnectionPool {
    /// Runs `f` on an idle connection, or waits for the round-robin pick.
    fn with<T>(&self, f: impl FnOnce(&mut Connection) -> T) -> T {
        let n = self.conns.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;
        for offset in 0..n {
            if let Some(mut guard) = self.conns[(start + offset) % n].try_lock() {
                return f(&mut guard);
            }
        }
        let mut guard = self.conns[start].lock();
        f(&mut guard)
    }
}

type RawTweet = (i64, i64, String, String);

impl SqliteStore {
    /// Opens (creating if needed) the database described by `opts`.
    pub fn open(opts: StoreOptions) -> Result<Self> {
        let conns = match &opts.location {
            StoreLocation::Memory => {
                let conn = Connection::open_in_memory()?;
                conn.busy_timeout(opts.busy_timeout)?;
                conn.execute_batch(CREATE_SCHEMA)?;
                vec![Mutex::new(conn)]
            }
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        fs::create_dir_all(parent)?;
                    }
                }
                let size = opts.pool_size.max(1);
                let mut conns = Vec::with_capacity(size);
                for slot in 0..size {
                    let conn = Connection::open(path)?;
                    conn.busy_timeout(opts.busy_timeout)?;
                    if slot == 0 {
                        conn.pragma_update(None, "journal_mode", "WAL")?;
                        conn.pragma_update(None, "synchronous", "NORMAL")?;
                        conn.execute_batch(CREATE_SCHEMA)?;
                    }
                    conns.push(Mutex::new(conn));
                }
                conns
            }
        };
        info!(
            location = ?opts.location,
            connections = conns.len(),
            "storage.open"
        );
        Ok(Self {
            pool: ConnectionPool {
                conns,
                next: AtomicUsize::new(0),
            },
            clock: opts.clock,
            retry: opts.retry,
            metrics: default_metrics(),
        })
    }

    /// Reports storage retries to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn FeedMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    fn attempt<T>(&self, op: &'static str, f: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
        self.retry.run_observed(op, self.metrics.as_ref(), f)
    }

    /// Opens a private in-memory store with default options.
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreOptions::memory())
    }

    fn list_edges(&self, sql: &'static str, user: UserId, limit: Option<usize>) -> Result<Vec<UserId>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        self.attempt("list_edges", || {
            self.pool.with(|conn| -> rusqlite::Result<Vec<UserId>> {
                let mut stmt = conn.prepare_cached(sql)?;
                let rows = stmt.query_map(params![user.0 as i64, limit], |row| row.get::<_, i64>(0))?;
                let ids = rows
                    .map(|id| id.map(|id| UserId(id as u64)))
                    .collect::<rusqlite::Result<Vec<_>>>();
                ids
            })
        })
    }
}

fn into_tweet(raw: RawTweet) -> Result<Tweet> {
    let (id, user, ts, text) = raw;
    Ok(Tweet {
        tweet_id: TweetId(id as u64),
        user_id: UserId(user as u64),
        tweet_ts: Timestamp::parse_datetime(&ts)?,
        tweet_text: text,
    })
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTweet> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

impl FeedStore for SqliteStore {
    fn insert_follow(&self, follower: UserId, followee: UserId) -> Result<()> {
        validate_follow(follower, followee)?;
        let outcome = self.attempt("insert_follow", || {
            self.pool.with(|conn| {
                conn.execute(
                    "INSERT INTO FOLLOWS (follower_id, followee_id) VALUES (?1, ?2)",
                    params![follower.0 as i64, followee.0 as i64],
                )
            })
        });
        match outcome {
            Ok(_) => {
                debug!(follower = follower.0, followee = followee.0, "storage.follow.insert");
                Ok(())
            }
            Err(FeedError::Storage(err))
                if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) =>
            {
                Err(FeedError::DuplicateEdge { follower, followee })
            }
            Err(err) => Err(err),
        }
    }

    fn delete_follow(&self, follower: UserId, followee: UserId) -> Result<bool> {
        let removed = self.attempt("delete_follow", || {
            self.pool.with(|conn| {
                conn.execute(
                    "DELETE FROM FOLLOWS WHERE follower_id = ?1 AND followee_id = ?2",
                    params![follower.0 as i64, followee.0 as i64],
                )
            })
        })?;
        Ok(removed > 0)
    }

    fn list_followees(&self, user: UserId, limit: Option<usize>) -> Result<Vec<UserId>> {
        self.list_edges(
            "SELECT followee_id FROM FOLLOWS WHERE follower_id = ?1 ORDER BY followee_id LIMIT ?2",
            user,
            limit,
        )
    }

    fn list_followers(&self, user: UserId, limit: Option<usize>) -> Result<Vec<UserId>> {
        self.list_edges(
            "SELECT follower_id FROM FOLLOWS WHERE followee_id = ?1 ORDER BY follower_id LIMIT ?2",
            user,
            limit,
        )
    }

    fn count_followers(&self, user: UserId) -> Result<usize> {
        let count: i64 = self.attempt("count_followers", || {
            self.pool.with(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM FOLLOWS WHERE followee_id = ?1",
                    params![user.0 as i64],
                    |row| row.get(0),
                )
            })
        })?;
        Ok(count as usize)
    }

    fn insert_tweet(&self, author: UserId, text: &str) -> Result<Tweet> {
        validate_tweet_text(text)?;
        let tweet_ts = self.clock.now();
        let ts_text = tweet_ts.to_datetime()?;
        let id = self.attempt("insert_tweet", || {
            self.pool.with(|conn| -> rusqlite::Result<i64> {
                conn.execute(
                    "INSERT INTO TWEET (user_id, tweet_ts, tweet_text) VALUES (?1, ?2, ?3)",
                    params![author.0 as i64, ts_text, text],
                )?;
                Ok(conn.last_insert_rowid())
            })
        })?;
        debug!(author = author.0, tweet_id = id, "storage.tweet.insert");
        Ok(Tweet {
            tweet_id: TweetId(id as u64),
            user_id: author,
            tweet_ts,
            tweet_text: text.to_string(),
        })
    }

    fn list_tweets_by_user(
        &self,
        user: UserId,
        before: Option<FeedKey>,
        limit: usize,
    ) -> Result<Vec<Tweet>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let before = match before {
            Some(key) => Some((key.ts.to_datetime()?, key.id.0 as i64)),
            None => None,
        };
        let raws = self.attempt("list_tweets_by_user", || {
            self.pool.with(|conn| -> rusqlite::Result<Vec<RawTweet>> {
                match &before {
                    Some((ts, id)) => {
                        let mut stmt = conn.prepare_cached(
                            "SELECT tweet_id, user_id, tweet_ts, tweet_text FROM TWEET
                             WHERE user_id = ?1 AND (tweet_ts < ?2 OR (tweet_ts = ?2 AND tweet_id < ?3))
                             ORDER BY tweet_ts DESC, tweet_id DESC LIMIT ?4",
                        )?;
                        let rows = stmt.query_map(
                            params![user.0 as i64, ts, id, limit as i64],
                            read_raw,
                        )?;
                        let collected = rows.collect::<rusqlite::Result<Vec<_>>>();
                        collected
                    }
                    None => {
                        let mut stmt = conn.prepare_cached(
                            "SELECT tweet_id, user_id, tweet_ts, tweet_text FROM TWEET
                             WHERE user_id = ?1
                             ORDER BY tweet_ts DESC, tweet_id DESC LIMIT ?2",
                        )?;
                        let rows = stmt.query_map(params![user.0 as i64, limit as i64], read_raw)?;
                        let collected = rows.collect::<rusqlite::Result<Vec<_>>>();
                        collected
                    }
                }
            })
        })?;
        raws.into_iter().map(into_tweet).collect()
    }

    fn get_tweets(&self, ids: &[TweetId]) -> Result<Vec<Tweet>> {
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(HYDRATE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT tweet_id, user_id, tweet_ts, tweet_text FROM TWEET WHERE tweet_id IN ({placeholders})"
            );
            let raws = self.attempt("get_tweets", || {
                self.pool.with(|conn| -> rusqlite::Result<Vec<RawTweet>> {
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(
                        params_from_iter(chunk.iter().map(|id| id.0 as i64)),
                        read_raw,
                    )?;
                    let collected = rows.collect::<rusqlite::Result<Vec<_>>>();
                    collected
                })
            })?;
            for raw in raws {
                out.push(into_tweet(raw)?);
            }
        }
        Ok(out)
    }

    fn insert_follows_ignoring_duplicates(&self, edges: &[(UserId, UserId)]) -> Result<u64> {
        let inserted = self.attempt("insert_follows_ignoring_duplicates", || {
            self.pool.with(|conn| -> rusqlite::Result<u64> {
                let tx = conn.transaction()?;
                let mut inserted = 0u64;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT OR IGNORE INTO FOLLOWS (follower_id, followee_id) VALUES (?1, ?2)",
                    )?;
                    for (follower, followee) in edges {
                        if validate_follow(*follower, *followee).is_err() {
                            continue;
                        }
                        inserted += stmt.execute(params![follower.0 as i64, followee.0 as i64])? as u64;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
        })?;
        debug!(batch = edges.len(), inserted, "storage.follow.bulk_insert");
        Ok(inserted)
    }

    fn random_follower(&self) -> Result<Option<UserId>> {
        let id: Option<i64> = self.attempt("random_follower", || {
            self.pool.with(|conn| {
                conn.query_row(
                    "SELECT follower_id FROM FOLLOWS ORDER BY RANDOM() LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
            })
        })?;
        Ok(id.map(|id| UserId(id as u64)))
    }

    fn stats(&self) -> Result<StoreStats> {
        let (follows, tweets): (i64, i64) = self.attempt("stats", || {
            self.pool.with(|conn| {
                conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM FOLLOWS), (SELECT COUNT(*) FROM TWEET)",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
            })
        })?;
        Ok(StoreStats {
            follows: follows as u64,
            tweets: tweets as u64,
        })
    }
}
