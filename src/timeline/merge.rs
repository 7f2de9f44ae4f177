use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::types::{FeedKey, TimelineEntry, Tweet};

/// Pops between deadline checks.
const DEADLINE_CHECK_INTERVAL: usize = 64;

/// Anything that can be placed on a timeline.
pub trait Keyed {
    /// Position of the item in timeline order.
    fn feed_key(&self) -> FeedKey;
}

impl Keyed for Tweet {
    fn feed_key(&self) -> FeedKey {
        self.key()
    }
}

impl Keyed for TimelineEntry {
    fn feed_key(&self) -> FeedKey {
        self.key()
    }
}

/// Result of [`merge_streams`].
#[derive(Debug)]
pub struct Merged<T> {
    /// Items in timeline order, without duplicate keys.
    pub items: Vec<T>,
    /// Set when the deadline stopped the merge before `take` items or exhaustion.
    pub partial: bool,
}

/// K-way merge of streams that are each already in timeline order.
///
/// Takes at most `take` items. Equal keys across streams are emitted once. When
/// `deadline` passes mid-merge the prefix merged so far is returned with
/// `partial` set; it is still correctly ordered because every emitted item was
/// the global minimum at the time it was popped.
pub fn merge_streams<T: Keyed>(
    streams: Vec<Vec<T>>,
    take: usize,
    deadline: Option<Instant>,
) -> Merged<T> {
    let mut iters: Vec<_> = streams.into_iter().map(Vec::into_iter).collect();
    let mut heads: Vec<Option<T>> = iters.iter_mut().map(Iterator::next).collect();
    let mut heap = BinaryHeap::with_capacity(heads.len());
    for (idx, head) in heads.iter().enumerate() {
        if let Some(item) = head {
            heap.push(Reverse((item.feed_key(), idx)));
        }
    }

    let mut items: Vec<T> = Vec::with_capacity(take.min(heap.len().saturating_mul(4)));
    let mut last: Option<FeedKey> = None;
    let mut popped = 0usize;
    while items.len() < take {
        if popped > 0 && popped % DEADLINE_CHECK_INTERVAL == 0 {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Merged {
                        items,
                        partial: true,
                    };
                }
            }
        }
        let Some(Reverse((key, idx))) = heap.pop() else {
            break;
        };
        popped += 1;
        if let Some(next) = iters[idx].next() {
            heap.push(Reverse((next.feed_key(), idx)));
            if let Some(item) = std::mem::replace(&mut heads[idx], Some(next)) {
                if last != Some(key) {
                    items.push(item);
                }
            }
        } else if let Some(item) = heads[idx].take() {
            if last != Some(key) {
                items.push(item);
            }
        }
        last = Some(key);
    }
    Merged {
        items,
        partial: false,
    }
}
