//! Tests for snapshot persist and restore
//!
//! These tests verify:
//! - Persist/restore with and without compression
//! - Exactly one of close/cancel per persist
//! - A failing sink cancels and surfaces its own error
//! - A persist observes the state at its start, not later applies
//! - File sinks commit atomically

use std::fs;
use std::io::{self, Cursor, Write};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use replikv::config::Config;
use replikv::snapshot::CHUNK_SIZE;
use replikv::{
    CommandPayload, FileSnapshotSink, FsmSnapshot, KvStateMachine, LogEntry, ReplikvError,
    SnapshotSink, StateMachine,
};
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Test Sinks
// =============================================================================

#[derive(Default)]
struct SinkRecord {
    data: Vec<u8>,
    closed: u32,
    cancelled: u32,
}

/// In-memory sink that records how it was completed
///
/// With `fail_after`, writes past that many bytes are refused.
#[derive(Clone, Default)]
struct MemorySink {
    record: Arc<Mutex<SinkRecord>>,
    fail_after: Option<usize>,
}

impl MemorySink {
    fn failing_after(bytes: usize) -> Self {
        Self {
            fail_after: Some(bytes),
            ..Self::default()
        }
    }

    fn data(&self) -> Vec<u8> {
        self.record.lock().data.clone()
    }

    fn completions(&self) -> (u32, u32) {
        let record = self.record.lock();
        (record.closed, record.cancelled)
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut record = self.record.lock();
        if let Some(limit) = self.fail_after {
            if record.data.len() + buf.len() > limit {
                return Err(io::Error::new(io::ErrorKind::Other, "sink refused write"));
            }
        }
        record.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SnapshotSink for MemorySink {
    fn id(&self) -> &str {
        "memory"
    }

    fn close(&mut self) -> io::Result<()> {
        self.record.lock().closed += 1;
        Ok(())
    }

    fn cancel(&mut self) -> io::Result<()> {
        self.record.lock().cancelled += 1;
        Ok(())
    }
}

/// Sink that parks its first write until the test releases it
struct GateSink {
    inner: MemorySink,
    reached: Sender<()>,
    release: Receiver<()>,
    opened: bool,
}

impl Write for GateSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.opened {
            self.opened = true;
            self.reached.send(()).unwrap();
            self.release.recv().unwrap();
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl SnapshotSink for GateSink {
    fn id(&self) -> &str {
        "gate"
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }

    fn cancel(&mut self) -> io::Result<()> {
        self.inner.cancel()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_machine(use_compression: bool) -> (TempDir, KvStateMachine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .use_compression(use_compression)
        .build();
    let fsm = KvStateMachine::open(&config).unwrap();
    (temp_dir, fsm)
}

fn apply(fsm: &KvStateMachine, payload: CommandPayload) -> Value {
    let entry = LogEntry::command(1, 1, payload.encode().unwrap());
    let result = fsm.apply(&entry).unwrap();
    assert!(result.is_ok(), "apply failed: {:?}", result.error);
    result.data
}

fn fill(fsm: &KvStateMachine, count: usize) {
    for i in 0..count {
        apply(
            fsm,
            CommandPayload::set(format!("key-{:04}", i), json!({"n": i, "pad": "p".repeat(64)})),
        );
    }
}

fn persist(fsm: &KvStateMachine, sink: &mut dyn SnapshotSink) -> replikv::Result<()> {
    let mut snapshot = fsm.snapshot()?;
    let result = snapshot.persist(sink);
    snapshot.release();
    result
}

// =============================================================================
// Persist / Restore Tests
// =============================================================================

#[test]
fn test_persist_and_restore_uncompressed() {
    let (_temp_a, source) = setup_machine(false);
    fill(&source, 20);

    let mut sink = MemorySink::default();
    persist(&source, &mut sink).unwrap();
    assert_eq!(sink.completions(), (1, 0));

    let (_temp_b, target) = setup_machine(false);
    apply(&target, CommandPayload::set("stale", json!(1)));
    target.restore(Box::new(Cursor::new(sink.data()))).unwrap();

    assert_eq!(
        apply(&target, CommandPayload::get("key-0007")),
        json!({"n": 7, "pad": "p".repeat(64)})
    );
    assert_eq!(apply(&target, CommandPayload::get("stale")), json!({}));
    assert_eq!(target.store().entry_count().unwrap(), 20);
}

#[test]
fn test_persist_and_restore_compressed() {
    let (_temp_a, source) = setup_machine(true);
    fill(&source, 20);

    let mut sink = MemorySink::default();
    persist(&source, &mut sink).unwrap();
    assert_eq!(sink.completions(), (1, 0));

    let data = sink.data();
    assert_eq!(&data[..4], &[0x28, 0xB5, 0x2F, 0xFD]);

    let (_temp_b, target) = setup_machine(true);
    target.restore(Box::new(Cursor::new(data))).unwrap();

    assert_eq!(
        apply(&target, CommandPayload::get("key-0019")),
        json!({"n": 19, "pad": "p".repeat(64)})
    );
    assert_eq!(target.store().entry_count().unwrap(), 20);
}

#[test]
fn test_compressed_persist_spanning_many_chunks() {
    let (_temp_a, source) = setup_machine(true);
    fill(&source, 2000);

    // The dump alone is well over the pipeline's chunk size
    let mut plain = Vec::new();
    source.store().read_view().unwrap().dump_to(&mut plain).unwrap();
    assert!(plain.len() > 4 * CHUNK_SIZE);

    let mut sink = MemorySink::default();
    persist(&source, &mut sink).unwrap();

    let (_temp_b, target) = setup_machine(true);
    target.restore(Box::new(Cursor::new(sink.data()))).unwrap();

    assert_eq!(target.store().entry_count().unwrap(), 2000);
    assert_eq!(
        apply(&target, CommandPayload::get("key-1999")),
        json!({"n": 1999, "pad": "p".repeat(64)})
    );
}

#[test]
fn test_persist_empty_store() {
    for use_compression in [false, true] {
        let (_temp_a, source) = setup_machine(use_compression);
        let mut sink = MemorySink::default();
        persist(&source, &mut sink).unwrap();

        let (_temp_b, target) = setup_machine(use_compression);
        apply(&target, CommandPayload::set("stale", json!(1)));
        target.restore(Box::new(Cursor::new(sink.data()))).unwrap();

        assert_eq!(target.store().entry_count().unwrap(), 0);
    }
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_failing_sink_cancels_uncompressed() {
    let (_temp, fsm) = setup_machine(false);
    fill(&fsm, 50);

    let mut sink = MemorySink::failing_after(100);
    let err = persist(&fsm, &mut sink).unwrap_err();

    assert!(matches!(err, ReplikvError::Io(_)));
    assert!(err.to_string().contains("sink refused write"));
    assert_eq!(sink.completions(), (0, 1));
}

#[test]
fn test_failing_sink_cancels_compressed() {
    let (_temp, fsm) = setup_machine(true);
    fill(&fsm, 500);

    let mut sink = MemorySink::failing_after(16);
    let err = persist(&fsm, &mut sink).unwrap_err();

    // The sink's own error wins over the dump stage's broken pipe
    assert!(err.to_string().contains("sink refused write"), "got {}", err);
    assert_eq!(sink.completions(), (0, 1));
}

#[test]
fn test_restore_rejects_corrupt_stream_and_keeps_state() {
    let (_temp_a, source) = setup_machine(false);
    fill(&source, 10);
    let mut sink = MemorySink::default();
    persist(&source, &mut sink).unwrap();
    let mut data = sink.data();
    let mid = data.len() / 2;
    data[mid] ^= 0xFF;

    let (_temp_b, target) = setup_machine(false);
    apply(&target, CommandPayload::set("keep", json!("me")));
    let result = target.restore(Box::new(Cursor::new(data)));

    assert!(result.is_err());
    assert_eq!(apply(&target, CommandPayload::get("keep")), json!("me"));
}

#[test]
fn test_restore_rejects_compression_mismatch_and_keeps_state() {
    for source_compression in [true, false] {
        let (_temp_a, source) = setup_machine(source_compression);
        apply(&source, CommandPayload::set("a", json!({"x": 1})));
        let mut sink = MemorySink::default();
        persist(&source, &mut sink).unwrap();

        let (_temp_b, target) = setup_machine(!source_compression);
        apply(&target, CommandPayload::set("keep", json!("me")));
        let result = target.restore(Box::new(Cursor::new(sink.data())));

        match result {
            Err(ReplikvError::CompressionMismatch { stream, node }) => {
                assert_eq!(stream, source_compression);
                assert_eq!(node, !source_compression);
            }
            other => panic!("expected compression mismatch, got {:?}", other),
        }
        assert_eq!(apply(&target, CommandPayload::get("keep")), json!("me"));
        assert_eq!(apply(&target, CommandPayload::get("a")), json!({}));
    }
}

#[test]
fn test_restore_rejects_empty_stream() {
    let (_temp, fsm) = setup_machine(false);

    let result = fsm.restore(Box::new(Cursor::new(Vec::new())));

    assert!(matches!(result, Err(ReplikvError::SnapshotCorruption(_))));
}

// =============================================================================
// Isolation Tests
// =============================================================================

fn check_isolation(use_compression: bool) {
    let (_temp, fsm) = setup_machine(use_compression);
    apply(&fsm, CommandPayload::set("k", json!("old")));

    let (reached_tx, reached_rx) = channel::bounded(1);
    let (release_tx, release_rx) = channel::bounded(1);
    let mut sink = GateSink {
        inner: MemorySink::default(),
        reached: reached_tx,
        release: release_rx,
        opened: false,
    };
    let recorded = sink.inner.clone();

    let mut snapshot = fsm.snapshot().unwrap();
    thread::scope(|scope| {
        let persisting = scope.spawn(|| snapshot.persist(&mut sink));

        // The persist is under way; overwrite the key before it continues
        reached_rx.recv().unwrap();
        apply(&fsm, CommandPayload::set("k", json!("new")));
        release_tx.send(()).unwrap();

        persisting.join().unwrap().unwrap();
    });
    snapshot.release();

    assert_eq!(apply(&fsm, CommandPayload::get("k")), json!("new"));

    let (_temp_b, target) = setup_machine(use_compression);
    target
        .restore(Box::new(Cursor::new(recorded.data())))
        .unwrap();
    assert_eq!(apply(&target, CommandPayload::get("k")), json!("old"));
}

#[test]
fn test_persist_is_isolated_from_concurrent_apply() {
    check_isolation(false);
}

#[test]
fn test_compressed_persist_is_isolated_from_concurrent_apply() {
    check_isolation(true);
}

// =============================================================================
// File Sink Tests
// =============================================================================

#[test]
fn test_file_sink_commit_renames() {
    let (temp, fsm) = setup_machine(true);
    fill(&fsm, 5);
    let dir = temp.path().join("snapshots");

    let mut sink = FileSnapshotSink::create(&dir, "1-5-0").unwrap();
    persist(&fsm, &mut sink).unwrap();

    assert!(sink.path().exists());
    assert!(!dir.join("1-5-0.tmp").exists());

    let (_temp_b, target) = setup_machine(true);
    let file = fs::File::open(sink.path()).unwrap();
    target.restore(Box::new(file)).unwrap();
    assert_eq!(target.store().entry_count().unwrap(), 5);
}

#[test]
fn test_file_sink_cancel_removes_temp_file() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("snapshots");

    let mut sink = FileSnapshotSink::create(&dir, "partial").unwrap();
    sink.write_all(b"half a snapshot").unwrap();
    sink.cancel().unwrap();

    assert!(!dir.join("partial.tmp").exists());
    assert!(!sink.path().exists());
}

#[test]
fn test_file_sink_completes_once() {
    let temp = TempDir::new().unwrap();

    let mut sink = FileSnapshotSink::create(temp.path(), "once").unwrap();
    sink.write_all(b"data").unwrap();
    sink.close().unwrap();

    assert!(sink.close().is_err());
    assert!(sink.cancel().is_err());
    assert!(sink.write_all(b"more").is_err());
    assert_eq!(fs::read(sink.path()).unwrap(), b"data");
}
