use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim};
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{info, warn};

use crate::service::FeedService;
use crate::types::{FeedError, UserId};

use super::CliError;

const FOLLOW_BATCH_SIZE: usize = 1_000;

/// Counts reported by the loaders.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LoadSummary {
    /// Data rows read from the file.
    pub rows_read: u64,
    /// Rows that reached storage.
    pub inserted: u64,
    /// Rows skipped: duplicates, self-follows, or rejected tweets.
    pub skipped: u64,
}

/// Configuration for [`load_tweets`].
#[derive(Debug, Clone)]
pub struct TweetLoadConfig {
    /// `user_id,tweet_text` file with a header line.
    pub path: PathBuf,
    /// Stop after this many tweets have been posted.
    pub target: Option<u64>,
}

/// Loads `follower_id,followee_id` rows, ignoring edges that already exist.
///
/// Rows go straight to storage in batches, so the service's derived state is
/// dropped afterwards.
pub fn load_follows(
    svc: &FeedService,
    path: &Path,
    has_header: bool,
    progress: &ProgressBar,
) -> Result<LoadSummary, CliError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(has_header)
        .trim(Trim::All)
        .from_path(path)?;
    let mut summary = LoadSummary::default();
    let mut batch = Vec::with_capacity(FOLLOW_BATCH_SIZE);
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let line = idx + if has_header { 2 } else { 1 };
        let follower = parse_id(record.get(0), path, line)?;
        let followee = parse_id(record.get(1), path, line)?;
        batch.push((follower, followee));
        summary.rows_read += 1;
        if batch.len() == FOLLOW_BATCH_SIZE {
            summary.inserted += svc.store().insert_follows_ignoring_duplicates(&batch)?;
            progress.inc(batch.len() as u64);
            batch.clear();
        }
    }
    if !batch.is_empty() {
        summary.inserted += svc.store().insert_follows_ignoring_duplicates(&batch)?;
        progress.inc(batch.len() as u64);
    }
    summary.skipped = summary.rows_read - summary.inserted;
    svc.graph().clear();
    svc.cache().clear();
    info!(
        path = %path.display(),
        rows = summary.rows_read,
        inserted = summary.inserted,
        "cli.load_follows"
    );
    Ok(summary)
}

/// Posts every tweet in a `user_id,tweet_text` file through the service.
///
/// Lines are split on the first comma only, so tweet text may contain commas
/// and is taken verbatim. Tweets that fail validation are skipped.
pub fn load_tweets(
    svc: &FeedService,
    cfg: &TweetLoadConfig,
    progress: &ProgressBar,
) -> Result<LoadSummary, CliError> {
    let file = File::open(&cfg.path)?;
    let mut summary = LoadSummary::default();
    for (idx, line) in BufReader::new(file).lines().enumerate().skip(1) {
        if cfg.target.is_some_and(|target| summary.inserted >= target) {
            break;
        }
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        summary.rows_read += 1;
        let (user, text) = line.split_once(',').ok_or_else(|| {
            CliError::Message(format!(
                "{}:{}: expected user_id,tweet_text",
                cfg.path.display(),
                idx + 1
            ))
        })?;
        let user = parse_id(Some(user), &cfg.path, idx + 1)?;
        match svc.post_tweet(user, text) {
            Ok(_) => {
                summary.inserted += 1;
                progress.inc(1);
            }
            Err(FeedError::Validation(err)) => {
                warn!(line = idx + 1, %err, "cli.load_tweets.rejected");
                summary.skipped += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    svc.flush();
    info!(
        path = %cfg.path.display(),
        inserted = summary.inserted,
        skipped = summary.skipped,
        "cli.load_tweets"
    );
    Ok(summary)
}

fn parse_id(field: Option<&str>, path: &Path, line: usize) -> Result<UserId, CliError> {
    let raw = field.map(str::trim).unwrap_or_default();
    raw.parse::<u64>().map(UserId).map_err(|_| {
        CliError::Message(format!(
            "{}:{line}: invalid user id '{raw}'",
            path.display()
        ))
    })
}
