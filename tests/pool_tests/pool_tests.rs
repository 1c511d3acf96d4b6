//! Tests for the buffer pools
//!
//! These tests verify:
//! - Bounded pool capacity bound and non-blocking put/get
//! - Oversized-item rejection for both strategies
//! - Elastic pool create-on-miss and retained ceiling
//! - RAII checkout guards
//! - Concurrent borrowers never share an item

use std::sync::Arc;
use std::thread;

use bytes::BytesMut;
use replikv::config::{Config, DEFAULT_POOL_CAPACITY};
use replikv::pool::{BoundedBytePool, ElasticBufferPool, ElasticBytePool};

// =============================================================================
// Bounded Pool Tests
// =============================================================================

#[test]
fn test_bounded_get_on_empty_pool_is_none() {
    let pool = BoundedBytePool::new(4, 1024);

    assert!(pool.get().is_none());
    assert!(pool.is_empty());
}

#[test]
fn test_bounded_zero_capacity_falls_back_to_default() {
    let pool = BoundedBytePool::new(0, 1024);

    assert_eq!(pool.capacity(), DEFAULT_POOL_CAPACITY);
}

#[test]
fn test_bounded_put_then_get_reuses_cleared_buffer() {
    let pool = BoundedBytePool::new(4, 1024);

    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(b"stale bytes");
    pool.put(buf);
    assert_eq!(pool.len(), 1);

    let reused = pool.get().unwrap();
    assert!(reused.is_empty());
    assert!(reused.capacity() >= 128);
    assert!(pool.is_empty());
}

#[test]
fn test_bounded_never_exceeds_capacity() {
    let pool = BoundedBytePool::new(3, 1024);

    // Put on a full pool neither blocks nor errors
    for _ in 0..10 {
        pool.put(Vec::with_capacity(16));
    }

    assert_eq!(pool.len(), 3);
}

#[test]
fn test_bounded_rejects_oversized_buffer() {
    let pool = BoundedBytePool::new(4, 64);

    pool.put(Vec::with_capacity(1024));

    assert_eq!(pool.len(), 0);
}

#[test]
fn test_bounded_checkout_returns_on_drop() {
    let pool = BoundedBytePool::new(4, 1024);

    {
        let mut buf = pool.checkout();
        buf.extend_from_slice(b"hello");
        assert_eq!(&buf[..], b"hello");
        assert!(pool.is_empty());
    }

    assert_eq!(pool.len(), 1);
    assert!(pool.get().unwrap().is_empty());
}

#[test]
fn test_bounded_detach_keeps_buffer() {
    let pool = BoundedBytePool::new(4, 1024);

    let mut buf = pool.checkout();
    buf.extend_from_slice(b"keep");
    let owned = buf.detach();

    assert_eq!(owned, b"keep");
    assert!(pool.is_empty());
}

#[test]
fn test_bounded_from_config() {
    let config = Config::builder()
        .pool_capacity(7)
        .pool_max_item_capacity(512)
        .build();
    let pool = BoundedBytePool::from_config(&config);

    assert_eq!(pool.capacity(), 7);
    assert_eq!(pool.max_item_capacity(), 512);
}

// =============================================================================
// Elastic Pool Tests
// =============================================================================

#[test]
fn test_elastic_get_creates_on_miss() {
    let pool = ElasticBytePool::new(1024, 16);

    let buf = pool.get();

    assert!(buf.is_empty());
    assert!(pool.is_empty());
}

#[test]
fn test_elastic_put_then_get_reuses() {
    let pool = ElasticBufferPool::new(1024, 16);

    let mut buf = BytesMut::with_capacity(256);
    buf.extend_from_slice(b"data");
    pool.put(buf);
    assert_eq!(pool.len(), 1);

    let reused = pool.get();
    assert!(reused.is_empty());
    assert!(reused.capacity() >= 256);
    assert_eq!(pool.len(), 0);
}

#[test]
fn test_elastic_rejects_oversized_item() {
    let pool = ElasticBytePool::new(64, 16);

    pool.put(Vec::with_capacity(4096));

    assert_eq!(pool.len(), 0);
}

#[test]
fn test_elastic_respects_retained_ceiling() {
    let pool = ElasticBytePool::new(1024, 2);

    for _ in 0..5 {
        pool.put(Vec::with_capacity(8));
    }

    assert_eq!(pool.len(), 2);
}

#[test]
fn test_elastic_checkout_with_capacity() {
    let pool = ElasticBufferPool::new(64 * 1024, 16);

    {
        let buf = pool.checkout_with_capacity(4096);
        assert!(buf.capacity() >= 4096);
    }

    assert_eq!(pool.len(), 1);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_bounded_concurrent_borrowers() {
    let pool = Arc::new(BoundedBytePool::new(8, 1024));
    let mut handles = vec![];

    for t in 0..8u8 {
        let pool = Arc::clone(&pool);
        handles.push(thread::spawn(move || {
            for _ in 0..500 {
                let mut buf = pool.checkout();
                // A shared buffer would show another thread's bytes here
                assert!(buf.is_empty());
                buf.extend_from_slice(&[t; 32]);
                assert!(buf.iter().all(|b| *b == t));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(pool.len() <= 8);
}

#[test]
fn test_elastic_concurrent_borrowers() {
    let pool = Arc::new(ElasticBufferPool::new(1024, 64));
    let mut handles = vec![];

    for t in 0..8u8 {
        let pool = Arc::clone(&pool);
        handles.push(thread::spawn(move || {
            for _ in 0..500 {
                let mut buf = pool.checkout();
                assert!(buf.is_empty());
                buf.extend_from_slice(&[t; 32]);
                assert!(buf.iter().all(|b| *b == t));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(pool.len() <= 64);
}
