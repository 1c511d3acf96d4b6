//! Elastic pools
//!
//! Self-replenishing free lists with create-on-miss semantics.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use crossbeam::queue::SegQueue;

use super::{Pooled, Recycler, Reusable};
use crate::config::Config;

/// Elastic pool of plain byte vectors
pub type ElasticBytePool = ElasticPool<Vec<u8>>;

/// Elastic pool of growable buffers
pub type ElasticBufferPool = ElasticPool<BytesMut>;

/// Unbounded-growth pool with an explicit free list
///
/// Unlike a collector-driven pool, idle items are never evicted passively:
/// the free list only shrinks when callers take items out. Growth is capped
/// two ways:
/// - items whose capacity exceeds `max_item_capacity` are discarded on `put`
/// - at most `max_retained` idle items are kept
pub struct ElasticPool<T> {
    free: SegQueue<T>,
    /// Idle items, counted before the push so the ceiling is strict
    retained: AtomicUsize,
    max_item_capacity: usize,
    max_retained: usize,
}

impl<T: Reusable> ElasticPool<T> {
    pub fn new(max_item_capacity: usize, max_retained: usize) -> Self {
        Self {
            free: SegQueue::new(),
            retained: AtomicUsize::new(0),
            max_item_capacity,
            max_retained,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.pool_max_item_capacity, config.pool_max_retained)
    }

    /// Take an empty item, allocating one if the free list is empty
    pub fn get(&self) -> T {
        match self.free.pop() {
            Some(item) => {
                self.retained.fetch_sub(1, Ordering::AcqRel);
                item
            }
            None => T::default(),
        }
    }

    /// Reset an item and keep it if it passes the admission checks
    pub fn put(&self, mut item: T) {
        if item.capacity() > self.max_item_capacity {
            return;
        }
        if self.retained.fetch_add(1, Ordering::AcqRel) >= self.max_retained {
            self.retained.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        item.reset();
        self.free.push(item);
    }

    /// Borrow an item that returns itself on drop
    pub fn checkout(&self) -> Pooled<'_, T> {
        Pooled::new(self.get(), self)
    }

    /// Number of idle items currently retained
    pub fn len(&self) -> usize {
        self.retained.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_item_capacity(&self) -> usize {
        self.max_item_capacity
    }
}

impl<T: Reusable> Recycler<T> for ElasticPool<T> {
    fn recycle(&self, item: T) {
        self.put(item);
    }
}

impl ElasticBufferPool {
    /// Borrow a buffer with at least `capacity` bytes reserved
    pub fn checkout_with_capacity(&self, capacity: usize) -> Pooled<'_, BytesMut> {
        let mut buf = self.checkout();
        buf.reserve(capacity);
        buf
    }
}
