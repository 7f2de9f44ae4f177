//! Follow graph index.
//!
//! Bidirectional adjacency cache over the FOLLOWS relation. Storage stays
//! authoritative; the index is an eventually consistent, bounded view of it.

mod index;

pub use index::{FollowGraphIndex, FollowSet, IndexOptions, IndexStats};
