//! Pool Module
//!
//! Buffer reuse for the apply, snapshot and transport hot paths.
//!
//! ## Strategies
//! - `BoundedBytePool`: fixed capacity queue, `get` never allocates and
//!   `put` drops the buffer when the queue is full
//! - `ElasticPool`: free list with create-on-miss `get`, bounded only by a
//!   per-item capacity threshold and a retained-count ceiling
//!
//! ## Ownership
//! A pool exclusively owns idle items. A caller owns a borrowed item until it
//! hands it back with `put`, or until its `Pooled` guard drops. Handoff goes
//! through a lock-free queue, so an item is never held by two borrowers.

mod bounded;
mod elastic;

use std::ops::{Deref, DerefMut};

use bytes::BytesMut;

pub use bounded::BoundedBytePool;
pub use elastic::{ElasticBufferPool, ElasticBytePool, ElasticPool};

/// An item a pool can hand out again after a reset
pub trait Reusable: Default + Send {
    /// Allocated capacity, compared against the admission threshold
    fn capacity(&self) -> usize;

    /// Drop contents, keep the allocation
    fn reset(&mut self);
}

impl Reusable for Vec<u8> {
    fn capacity(&self) -> usize {
        Vec::capacity(self)
    }

    fn reset(&mut self) {
        self.clear();
    }
}

impl Reusable for BytesMut {
    fn capacity(&self) -> usize {
        BytesMut::capacity(self)
    }

    fn reset(&mut self) {
        self.clear();
    }
}

/// Where a `Pooled` guard sends its item when dropped
pub trait Recycler<T>: Sync {
    fn recycle(&self, item: T);
}

/// RAII handle over a borrowed pool item
pub struct Pooled<'a, T> {
    item: Option<T>,
    home: &'a dyn Recycler<T>,
}

impl<'a, T> Pooled<'a, T> {
    pub(crate) fn new(item: T, home: &'a dyn Recycler<T>) -> Self {
        Self {
            item: Some(item),
            home,
        }
    }

    /// Keep the item instead of returning it to the pool
    pub fn detach(mut self) -> T {
        // Only `drop` takes the item otherwise, and `self` is consumed here
        match self.item.take() {
            Some(item) => item,
            None => unreachable!("pooled item taken twice"),
        }
    }
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item used after release"),
        }
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item used after release"),
        }
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.home.recycle(item);
        }
    }
}
