//! Murmur: follow graph and home timelines over a relational store.
//!
//! Storage holds two relations, FOLLOWS and TWEET. Everything else is derived:
//! a sharded follow graph index, a cache of timeline segments filled by
//! fan-out on write, and a merge path that pulls high-follower authors at read
//! time. [`service::FeedService`] ties the layers together; [`http`] and the
//! `murmur` binary expose it.

#![warn(missing_docs)]

pub mod cli;
pub mod graph;
pub mod http;
pub mod metrics;
pub mod primitives;
pub mod service;
pub mod storage;
pub mod timeline;
pub mod types;

pub use service::{FeedService, ServiceOptions};
pub use types::{FeedError, FeedKey, Result, TimelineEntry, Timestamp, Tweet, TweetId, UserId};
