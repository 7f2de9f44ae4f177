//! Bulk loaders and throughput drivers used by the `murmur` binary.

/// Post and timeline throughput drivers.
pub mod bench;
/// CSV import of follows and tweets.
pub mod load;

use thiserror::Error;

use crate::types::FeedError;

pub use bench::{bench_post, bench_timeline, BenchReport, TimelineBenchConfig};
pub use load::{load_follows, load_tweets, LoadSummary, TweetLoadConfig};

/// Error type for CLI-driven operations.
#[derive(Error, Debug)]
pub enum CliError {
    /// Generic error message.
    #[error("{0}")]
    Message(String),
    /// IO error from file operations.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// CSV parsing error.
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// Service error.
    #[error(transparent)]
    Feed(#[from] FeedError),
}

impl From<&str> for CliError {
    fn from(value: &str) -> Self {
        CliError::Message(value.to_string())
    }
}

impl From<String> for CliError {
    fn from(value: String) -> Self {
        CliError::Message(value)
    }
}
