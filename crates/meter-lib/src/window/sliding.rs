//! Time-bounded sliding window
//!
//! A double-ended queue of timestamped items with two eviction rules:
//! items older than `newest - span` leave from the front, and the oldest
//! items leave once `capacity` is exceeded. Shared by the window store and
//! the flatline detector.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// Anything that can be placed in a [`SlidingWindow`]
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for crate::models::Reading {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl<V> Timestamped for (DateTime<Utc>, V) {
    fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }
}

/// `ts - span`, saturating at the earliest representable instant
pub(crate) fn older_by(ts: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    ts.checked_sub_signed(span)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Result of a [`SlidingWindow::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    /// False when the item was already older than the window cutoff
    pub accepted: bool,
    /// Items evicted by age or capacity during this push
    pub evicted: usize,
}

/// Sliding window ordered by timestamp (non-decreasing)
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    span: Duration,
    capacity: usize,
    items: VecDeque<T>,
}

impl<T: Timestamped> SlidingWindow<T> {
    pub fn new(span: Duration, capacity: usize) -> Self {
        Self {
            span,
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    /// Insert an item and evict whatever falls out of the window.
    ///
    /// In-order items are appended. A late item that is still inside the
    /// window is inserted at its sorted position; one that is already
    /// outside it is refused.
    pub fn push(&mut self, item: T) -> PushOutcome {
        let ts = item.timestamp();

        match self.items.back().map(|newest| newest.timestamp()) {
            Some(newest) if ts < newest => {
                if ts < older_by(newest, self.span) {
                    return PushOutcome {
                        accepted: false,
                        evicted: 0,
                    };
                }
                let pos = self.items.partition_point(|x| x.timestamp() <= ts);
                self.items.insert(pos, item);
            }
            _ => self.items.push_back(item),
        }

        let mut evicted = self.evict_expired();
        while self.items.len() > self.capacity {
            self.items.pop_front();
            evicted += 1;
        }

        PushOutcome {
            accepted: true,
            evicted,
        }
    }

    /// Drop items older than `newest - span`
    fn evict_expired(&mut self) -> usize {
        match self.cutoff() {
            Some(cutoff) => self.evict_before(cutoff),
            None => 0,
        }
    }

    /// Drop every item with a timestamp strictly before `cutoff`
    pub fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.items.front() {
            if front.timestamp() < cutoff {
                self.items.pop_front();
                evicted += 1;
            } else {
                break;
            }
        }
        evicted
    }

    /// Oldest timestamp still admissible, anchored at the newest item
    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.latest()
            .map(|newest| older_by(newest.timestamp(), self.span))
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.items.iter()
    }

    /// Items with `start <= timestamp <= end`, in order
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> impl Iterator<Item = &T> + '_ {
        let from = self.items.partition_point(|x| x.timestamp() < start);
        self.items
            .range(from..)
            .take_while(move |x| x.timestamp() <= end)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn span(&self) -> Duration {
        self.span
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
