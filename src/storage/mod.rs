//! Storage accessor for the FOLLOWS and TWEET relations.
//!
//! [`FeedStore`] is the seam every higher layer talks to. [`SqliteStore`] is the
//! production implementation; it owns no business logic beyond input validation
//! and bounded retries of transient SQLite failures.

/// Server-side time source for tweet timestamps.
pub mod clock;

/// Bounded retry of transient storage failures.
pub mod retry;

/// DDL for the persisted relations.
pub mod schema;

mod options;
mod sqlite;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use options::{StoreLocation, StoreOptions};
pub use retry::RetryPolicy;
pub use sqlite::SqliteStore;
pub use store::{validate_follow, validate_tweet_text, FeedStore, StoreStats};
