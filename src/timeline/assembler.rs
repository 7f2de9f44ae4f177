use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::graph::FollowGraphIndex;
use crate::metrics::FeedMetrics;
use crate::storage::FeedStore;
use crate::types::{
    FeedError, FeedKey, Result, TimelineEntry, Tweet, TweetId, UserId, ValidationError,
};

use super::cache::{Segment, TimelineCache};
use super::merge::merge_streams;
use super::{PageSource, TweetPage};

/// A home-timeline read.
#[derive(Clone, Debug)]
pub struct TimelineQuery {
    /// Owner of the timeline.
    pub user: UserId,
    /// Return only tweets strictly after this key.
    pub cursor: Option<FeedKey>,
    /// Page size; must be at least 1.
    pub limit: usize,
    /// Give up (or return a partial page) once this instant passes.
    pub deadline: Option<Instant>,
}

impl TimelineQuery {
    /// First page of `user`'s timeline with no deadline.
    pub fn first_page(user: UserId, limit: usize) -> Self {
        Self {
            user,
            cursor: None,
            limit,
            deadline: None,
        }
    }
}

/// Builds home timelines from cached segments or by merging sources live.
pub struct TimelineAssembler {
    store: Arc<dyn FeedStore>,
    graph: Arc<FollowGraphIndex>,
    cache: Arc<TimelineCache>,
    metrics: Arc<dyn FeedMetrics>,
    celebrity_threshold: usize,
}

impl TimelineAssembler {
    /// Wires an assembler over shared components.
    pub fn new(
        store: Arc<dyn FeedStore>,
        graph: Arc<FollowGraphIndex>,
        cache: Arc<TimelineCache>,
        metrics: Arc<dyn FeedMetrics>,
        celebrity_threshold: usize,
    ) -> Self {
        Self {
            store,
            graph,
            cache,
            metrics,
            celebrity_threshold,
        }
    }

    /// One page of `query.user`'s home timeline, self-tweets included.
    pub fn home_timeline(&self, query: &TimelineQuery) -> Result<TweetPage> {
        if query.limit == 0 {
            return Err(ValidationError::InvalidLimit.into());
        }
        let started = Instant::now();
        let (sources, pulled) = self.partition(query, started)?;

        if let Some(segment) = self.cache.get(query.user) {
            if segment.pulled_authors() == &pulled {
                if let Some(page) = self.from_segment(query, &segment, started)? {
                    self.metrics.timeline_served(PageSource::Cache.as_str());
                    return Ok(page);
                }
                trace!(user = query.user.0, "timeline.segment.short");
            } else {
                debug!(user = query.user.0, "timeline.segment.partition_changed");
                self.cache.invalidate(query.user);
            }
        }

        let page = self.from_merge(query, &sources, &pulled, started)?;
        self.metrics.timeline_served(PageSource::Merge.as_str());
        Ok(page)
    }

    /// Every source of `user`'s timeline and the subset that must be pulled.
    pub fn sources(&self, user: UserId) -> Result<(Vec<UserId>, BTreeSet<UserId>)> {
        self.partition(&TimelineQuery::first_page(user, 1), Instant::now())
    }

    /// Follower counts may each cost a storage query on a cold index, so the
    /// deadline is checked before every one.
    fn partition(
        &self,
        query: &TimelineQuery,
        started: Instant,
    ) -> Result<(Vec<UserId>, BTreeSet<UserId>)> {
        let user = query.user;
        let followees = self.graph.followees(user)?;
        let mut sources: Vec<UserId> = followees.iter().copied().collect();
        if !followees.contains(&user) {
            sources.push(user);
        }
        let mut pulled = BTreeSet::new();
        for author in &sources {
            self.check_deadline(query, started)?;
            if self.graph.follower_count(*author)? >= self.celebrity_threshold {
                pulled.insert(*author);
            }
        }
        Ok((sources, pulled))
    }

    fn from_segment(
        &self,
        query: &TimelineQuery,
        segment: &Segment,
        started: Instant,
    ) -> Result<Option<TweetPage>> {
        let need = query.limit + 1;
        let window = segment.after(query.cursor.as_ref());
        if window.len() < need && !segment.is_complete() {
            return Ok(None);
        }

        let mut streams: Vec<Vec<TimelineEntry>> =
            Vec::with_capacity(1 + segment.pulled_authors().len());
        streams.push(window.iter().take(need).copied().collect());
        let mut known: HashMap<TweetId, Tweet> = HashMap::new();
        for author in segment.pulled_authors() {
            self.check_deadline(query, started)?;
            let tweets = self.store.list_tweets_by_user(*author, query.cursor, need)?;
            streams.push(tweets.iter().map(Tweet::entry).collect());
            known.extend(tweets.into_iter().map(|t| (t.tweet_id, t)));
        }

        let merged = merge_streams(streams, need, query.deadline);
        if merged.partial {
            self.note_partial(query, merged.items.len());
        }
        let missing: Vec<TweetId> = merged
            .items
            .iter()
            .map(|e| e.tweet_id)
            .filter(|id| !known.contains_key(id))
            .collect();
        if !missing.is_empty() {
            self.check_deadline(query, started)?;
            known.extend(
                self.store
                    .get_tweets(&missing)?
                    .into_iter()
                    .map(|t| (t.tweet_id, t)),
            );
        }
        let tweets: Vec<Tweet> = merged
            .items
            .iter()
            .filter_map(|e| known.remove(&e.tweet_id))
            .collect();
        debug!(
            user = query.user.0,
            pulled = segment.pulled_authors().len(),
            returned = tweets.len().min(query.limit),
            took_us = started.elapsed().as_micros() as u64,
            "timeline.push.read"
        );
        Ok(Some(TweetPage::from_lookahead(
            tweets,
            query.limit,
            PageSource::Cache,
            merged.partial,
        )))
    }

    fn from_merge(
        &self,
        query: &TimelineQuery,
        sources: &[UserId],
        pulled: &BTreeSet<UserId>,
        started: Instant,
    ) -> Result<TweetPage> {
        let need = query.limit + 1;
        // Only first pages warm the cache; deeper pages are not a segment prefix.
        let ticket = query
            .cursor
            .is_none()
            .then(|| self.cache.begin_rebuild(query.user));
        let depth = self.cache.depth();

        let mut streams: Vec<Vec<Tweet>> = Vec::with_capacity(sources.len());
        let mut pushed_exhausted = true;
        for author in sources {
            self.check_deadline(query, started)?;
            let is_pulled = pulled.contains(author);
            let fetch = if ticket.is_some() && !is_pulled {
                need.max(depth)
            } else {
                need
            };
            let tweets = self.store.list_tweets_by_user(*author, query.cursor, fetch)?;
            if !is_pulled && tweets.len() >= fetch {
                pushed_exhausted = false;
            }
            streams.push(tweets);
        }
        self.metrics.pull_merge(streams.len());

        let segment_streams: Option<Vec<Vec<TimelineEntry>>> = ticket.map(|_| {
            streams
                .iter()
                .zip(sources)
                .filter(|(_, author)| !pulled.contains(*author))
                .map(|(tweets, _)| tweets.iter().map(Tweet::entry).collect())
                .collect()
        });

        let merged = merge_streams(streams, need, query.deadline);
        debug!(
            user = query.user.0,
            sources = sources.len(),
            merged = merged.items.len(),
            partial = merged.partial,
            took_us = started.elapsed().as_micros() as u64,
            "timeline.pull.merge"
        );
        if merged.partial {
            self.note_partial(query, merged.items.len());
        } else if let (Some(ticket), Some(segment_streams)) = (ticket, segment_streams) {
            let total: usize = segment_streams.iter().map(Vec::len).sum();
            let entries = merge_streams(segment_streams, depth, None).items;
            let complete = pushed_exhausted && total <= depth;
            self.cache
                .install(ticket, Segment::new(entries, complete, pulled.clone()));
        }
        Ok(TweetPage::from_lookahead(
            merged.items,
            query.limit,
            PageSource::Merge,
            merged.partial,
        ))
    }

    fn check_deadline(&self, query: &TimelineQuery, started: Instant) -> Result<()> {
        match query.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.metrics.deadline_exceeded(false);
                warn!(
                    user = query.user.0,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "timeline.deadline.timeout"
                );
                Err(FeedError::Timeout {
                    elapsed: started.elapsed(),
                })
            }
            _ => Ok(()),
        }
    }

    fn note_partial(&self, query: &TimelineQuery, merged: usize) {
        self.metrics.deadline_exceeded(true);
        warn!(user = query.user.0, merged, "timeline.deadline.partial");
    }
}
