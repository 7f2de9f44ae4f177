use std::time::Instant;

use indicatif::ProgressBar;
use serde::Serialize;
use tracing::info;

use crate::service::FeedService;
use crate::types::FeedError;

use super::load::{load_tweets, TweetLoadConfig};
use super::CliError;

/// Throughput of one benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    /// Benchmark name.
    pub name: &'static str,
    /// Operations completed.
    pub operations: u64,
    /// Operations that failed with a deadline.
    pub timeouts: u64,
    /// Wall-clock duration in seconds.
    pub seconds: f64,
    /// `operations / seconds`.
    pub ops_per_sec: f64,
}

impl BenchReport {
    fn new(name: &'static str, operations: u64, timeouts: u64, started: Instant) -> Self {
        let seconds = started.elapsed().as_secs_f64();
        let ops_per_sec = if seconds > 0.0 {
            operations as f64 / seconds
        } else {
            0.0
        };
        Self {
            name,
            operations,
            timeouts,
            seconds,
            ops_per_sec,
        }
    }
}

/// Configuration for [`bench_timeline`].
#[derive(Debug, Clone, Copy)]
pub struct TimelineBenchConfig {
    /// Timeline reads to issue.
    pub requests: u64,
    /// Page size per read; `None` uses the service default.
    pub limit: Option<usize>,
}

impl Default for TimelineBenchConfig {
    fn default() -> Self {
        Self {
            requests: 50_000,
            limit: None,
        }
    }
}

/// Posts tweets from a file and reports posts per second, fan-out included.
pub fn bench_post(
    svc: &FeedService,
    cfg: &TweetLoadConfig,
    progress: &ProgressBar,
) -> Result<BenchReport, CliError> {
    let started = Instant::now();
    let summary = load_tweets(svc, cfg, progress)?;
    let report = BenchReport::new("post_tweet", summary.inserted, 0, started);
    info!(
        tweets = report.operations,
        ops_per_sec = report.ops_per_sec,
        "cli.bench_post"
    );
    Ok(report)
}

/// Reads home timelines of random followers and reports reads per second.
pub fn bench_timeline(
    svc: &FeedService,
    cfg: TimelineBenchConfig,
    progress: &ProgressBar,
) -> Result<BenchReport, CliError> {
    let started = Instant::now();
    let mut done = 0u64;
    let mut timeouts = 0u64;
    for _ in 0..cfg.requests {
        let user = svc
            .store()
            .random_follower()?
            .ok_or("FOLLOWS is empty; load follows first")?;
        match svc.home_timeline(user, None, cfg.limit) {
            Ok(_) => done += 1,
            Err(FeedError::Timeout { .. }) => timeouts += 1,
            Err(err) => return Err(err.into()),
        }
        progress.inc(1);
    }
    let report = BenchReport::new("home_timeline", done, timeouts, started);
    info!(
        reads = report.operations,
        timeouts,
        ops_per_sec = report.ops_per_sec,
        "cli.bench_timeline"
    );
    Ok(report)
}
