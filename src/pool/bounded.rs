//! Bounded byte pool
//!
//! Fixed-capacity pool backed by a bounded crossbeam channel.

use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};

use super::{Pooled, Recycler};
use crate::config::{Config, DEFAULT_POOL_CAPACITY};

/// Fixed-capacity pool of byte vectors
///
/// - `get` is a non-blocking dequeue; `None` means the caller allocates
/// - `put` is a non-blocking enqueue; full queue or oversized buffer → drop
///
/// The pool owns both ends of its queue, so the queue can only report itself
/// closed if the pool logic is broken. That is treated as fatal.
pub struct BoundedBytePool {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
    capacity: usize,
    max_item_capacity: usize,
}

impl BoundedBytePool {
    /// Create a pool holding at most `capacity` buffers (0 → default)
    pub fn new(capacity: usize, max_item_capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_POOL_CAPACITY
        } else {
            capacity
        };
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            max_item_capacity,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.pool_capacity, config.pool_max_item_capacity)
    }

    /// Take a pooled buffer if one is idle. Never blocks, never allocates.
    pub fn get(&self) -> Option<Vec<u8>> {
        match self.receiver.try_recv() {
            Ok(buf) => Some(buf),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                panic!("bounded byte pool queue closed while the pool is alive")
            }
        }
    }

    /// Return a buffer. Dropped if oversized or if the pool is full.
    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_item_capacity {
            tracing::trace!(capacity = buf.capacity(), "dropping oversized buffer");
            return;
        }
        buf.clear();
        match self.sender.try_send(buf) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                panic!("bounded byte pool queue closed while the pool is alive")
            }
        }
    }

    /// Borrow a buffer (fresh on miss) that returns itself on drop
    pub fn checkout(&self) -> Pooled<'_, Vec<u8>> {
        let buf = self.get().unwrap_or_default();
        Pooled::new(buf, self)
    }

    /// Number of idle buffers currently retained
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_item_capacity(&self) -> usize {
        self.max_item_capacity
    }
}

impl Recycler<Vec<u8>> for BoundedBytePool {
    fn recycle(&self, item: Vec<u8>) {
        self.put(item);
    }
}
