use std::collections::VecDeque;
use std::iter;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::graph::FollowGraphIndex;
use crate::metrics::FeedMetrics;
use crate::types::{Result, TimelineEntry};

use super::cache::TimelineCache;

/// Where fan-out on write runs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutMode {
    /// On the posting thread, before `post_tweet` returns.
    Inline,
    /// On a lazily spawned worker; `post_tweet` returns after the storage write.
    #[default]
    Background,
}

/// Configuration for the [`FanoutDispatcher`].
#[derive(Clone, Copy, Debug)]
pub struct FanoutConfig {
    /// Where fan-out runs.
    pub mode: FanoutMode,
    /// Authors with at least this many followers are pulled instead of pushed.
    pub celebrity_threshold: usize,
    /// Queueing delay above which a job is reported as lagging.
    pub target_latency: Duration,
    /// Maximum jobs handled per worker wakeup.
    pub max_batch: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            mode: FanoutMode::Background,
            celebrity_threshold: 10_000,
            target_latency: Duration::from_millis(500),
            max_batch: 64,
        }
    }
}

#[derive(Default)]
struct FanoutState {
    pending: VecDeque<FanoutJob>,
    worker_running: bool,
    in_flight: usize,
}

struct FanoutJob {
    entry: TimelineEntry,
    enqueued_at: Instant,
}

struct FanoutInner {
    graph: Arc<FollowGraphIndex>,
    cache: Arc<TimelineCache>,
    metrics: Arc<dyn FeedMetrics>,
    config: FanoutConfig,
    state: Mutex<FanoutState>,
    idle: Condvar,
}

/// Pushes new tweets into the cached segments of their author's followers.
///
/// In background mode jobs are queued and drained by a worker thread that is
/// spawned on demand and exits once the queue is empty.
pub struct FanoutDispatcher {
    inner: Arc<FanoutInner>,
}

impl FanoutDispatcher {
    /// Creates a dispatcher. No thread is started until the first submit.
    pub fn new(
        graph: Arc<FollowGraphIndex>,
        cache: Arc<TimelineCache>,
        metrics: Arc<dyn FeedMetrics>,
        mut config: FanoutConfig,
    ) -> Self {
        config.max_batch = config.max_batch.max(1);
        Self {
            inner: Arc::new(FanoutInner {
                graph,
                cache,
                metrics,
                config,
                state: Mutex::new(FanoutState::default()),
                idle: Condvar::new(),
            }),
        }
    }

    /// Whether `followers` makes an author a celebrity.
    pub fn is_celebrity(&self, followers: usize) -> bool {
        followers >= self.inner.config.celebrity_threshold
    }

    /// The active configuration.
    pub fn config(&self) -> FanoutConfig {
        self.inner.config
    }

    /// Schedules fan-out of a freshly stored tweet.
    pub fn submit(&self, entry: TimelineEntry) {
        if self.inner.config.mode == FanoutMode::Inline {
            self.inner.run(entry);
            return;
        }
        let mut state = self.inner.state.lock();
        state.pending.push_back(FanoutJob {
            entry,
            enqueued_at: Instant::now(),
        });
        debug!(
            tweet = entry.tweet_id.0,
            pending = state.pending.len(),
            worker_running = state.worker_running,
            "fanout.enqueue"
        );
        if state.worker_running {
            return;
        }
        state.worker_running = true;
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("murmur-fanout".into())
            .spawn(move || inner.worker_loop());
        if let Err(err) = spawned {
            warn!(error = %err, "fanout.spawn_failed");
            state.worker_running = false;
            let jobs: Vec<FanoutJob> = state.pending.drain(..).collect();
            drop(state);
            for job in jobs {
                self.inner.run(job.entry);
            }
        }
    }

    /// Blocks until every submitted job has been applied.
    pub fn flush(&self) {
        let mut state = self.inner.state.lock();
        while !state.pending.is_empty() || state.in_flight > 0 {
            self.inner.idle.wait(&mut state);
        }
    }

    /// Jobs queued or being applied.
    pub fn backlog(&self) -> usize {
        let state = self.inner.state.lock();
        state.pending.len() + state.in_flight
    }
}

impl FanoutInner {
    fn worker_loop(&self) {
        let mut batch = Vec::with_capacity(self.config.max_batch);
        loop {
            {
                let mut state = self.state.lock();
                if state.pending.is_empty() {
                    state.worker_running = false;
                    self.idle.notify_all();
                    debug!("fanout.worker_exit");
                    break;
                }
                let take = state.pending.len().min(self.config.max_batch);
                batch.extend(state.pending.drain(..take));
                state.in_flight = batch.len();
            }
            debug!(jobs = batch.len(), "fanout.worker_batch");
            for job in batch.drain(..) {
                let waited = job.enqueued_at.elapsed();
                if waited > self.config.target_latency {
                    warn!(
                        tweet = job.entry.tweet_id.0,
                        waited_ms = waited.as_millis() as u64,
                        target_ms = self.config.target_latency.as_millis() as u64,
                        "fanout.lagging"
                    );
                }
                self.run(job.entry);
            }
            let mut state = self.state.lock();
            state.in_flight = 0;
            if state.pending.is_empty() {
                self.idle.notify_all();
            }
        }
    }

    fn run(&self, entry: TimelineEntry) {
        if let Err(err) = self.push(entry) {
            // Without the follower set we cannot tell which segments now lack
            // the tweet, so none of them may be served.
            warn!(
                tweet = entry.tweet_id.0,
                author = entry.author_id.0,
                error = %err,
                "fanout.failed"
            );
            self.cache.clear();
        }
    }

    fn push(&self, entry: TimelineEntry) -> Result<usize> {
        let author = entry.author_id;
        let followers = self.graph.follower_count(author)?;
        if followers >= self.config.celebrity_threshold {
            self.metrics.fanout_skipped();
            debug!(author = author.0, followers, "fanout.celebrity_skip");
            return Ok(0);
        }
        let set = self.graph.followers(author)?;
        let updated = self
            .cache
            .push(set.iter().copied().chain(iter::once(author)), entry);
        self.metrics.fanout_pushed(updated);
        debug!(
            tweet = entry.tweet_id.0,
            followers = set.len(),
            updated,
            "fanout.pushed"
        );
        Ok(updated)
    }
}
