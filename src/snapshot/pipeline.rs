//! Compression pipeline
//!
//! Two stages joined by a bounded channel of pooled buffers:
//!
//! ```text
//!  ReadView::dump_to ──► ChunkWriter ══[bounded, pooled BytesMut]══► ChunkReader ──► zstd ──► sink
//!      (stage A, caller thread)                                   (stage B, scoped thread)
//! ```
//!
//! The first stage to fail decides the pipeline's error. A failing stage
//! hangs up its end of the channel, which unblocks and ends the other one.

use std::io::{self, Read, Write};
use std::thread;

use bytes::{Buf, BytesMut};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use super::SnapshotSink;
use crate::config::COMPRESSION_LEVEL;
use crate::error::{ReplikvError, Result};
use crate::pool::ElasticBufferPool;
use crate::store::ReadView;

/// Bytes per chunk handed from the dump stage to the compressor
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Chunks allowed in flight between the stages
pub const PIPELINE_DEPTH: usize = 4;

enum Frame {
    Data(BytesMut),
    /// The dump completed; anything after a hang-up without this is an abort
    End,
}

/// Run the dump and the compressor concurrently; returns entries dumped
pub(crate) fn compress_into(
    view: &ReadView<'_>,
    sink: &mut dyn SnapshotSink,
    buffers: &ElasticBufferPool,
) -> Result<u64> {
    run_pipeline(|writer| view.dump_to(writer), sink, buffers)
}

/// Drive `dump` on the caller thread against a compressor on a scoped one
fn run_pipeline<F>(dump: F, sink: &mut dyn SnapshotSink, buffers: &ElasticBufferPool) -> Result<u64>
where
    F: FnOnce(&mut ChunkWriter<'_>) -> Result<u64>,
{
    let first_error = FirstError::default();
    let (tx, rx) = channel::bounded(PIPELINE_DEPTH);

    let dumped = thread::scope(|scope| {
        let compressor = scope.spawn(|| {
            let mut reader = ChunkReader::new(rx, buffers);
            if let Err(e) = compress_stage(&mut reader, sink) {
                // Record before the reader hangs up
                first_error.record(e);
            }
        });

        let mut writer = ChunkWriter::new(tx, buffers);
        let dumped = dump(&mut writer).and_then(|count| {
            writer.finish()?;
            Ok(count)
        });
        let count = match dumped {
            Ok(count) => Some(count),
            Err(e) => {
                first_error.record(e);
                None
            }
        };
        // Record before hanging up; the compressor then sees a broken pipe
        drop(writer);

        if compressor.join().is_err() {
            first_error.record(ReplikvError::Io(io::Error::new(
                io::ErrorKind::Other,
                "snapshot compressor panicked",
            )));
        }
        count
    });

    match first_error.take() {
        Some(e) => Err(e),
        None => Ok(dumped.unwrap_or_default()),
    }
}

fn compress_stage(reader: &mut ChunkReader<'_>, sink: &mut dyn SnapshotSink) -> Result<()> {
    let mut encoder = zstd::stream::write::Encoder::new(sink, COMPRESSION_LEVEL)?;
    io::copy(reader, &mut encoder)?;
    let sink = encoder.finish()?;
    sink.flush()?;
    Ok(())
}

/// First error reported by either stage
#[derive(Default)]
struct FirstError(Mutex<Option<ReplikvError>>);

impl FirstError {
    fn record(&self, e: ReplikvError) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(e);
        }
    }

    fn take(&self) -> Option<ReplikvError> {
        self.0.lock().take()
    }
}

// =============================================================================
// Stage ends
// =============================================================================

/// Write half: batches bytes into pooled chunks
struct ChunkWriter<'a> {
    tx: Sender<Frame>,
    pool: &'a ElasticBufferPool,
    current: Option<BytesMut>,
}

impl<'a> ChunkWriter<'a> {
    fn new(tx: Sender<Frame>, pool: &'a ElasticBufferPool) -> Self {
        Self {
            tx,
            pool,
            current: None,
        }
    }

    fn send(&self, frame: Frame) -> io::Result<()> {
        self.tx.send(frame).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "snapshot compressor hung up")
        })
    }

    fn ship_current(&mut self) -> io::Result<()> {
        match self.current.take() {
            Some(chunk) if !chunk.is_empty() => self.send(Frame::Data(chunk)),
            Some(chunk) => {
                self.pool.put(chunk);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Ship the last chunk and the end marker
    fn finish(&mut self) -> io::Result<()> {
        self.ship_current()?;
        self.send(Frame::End)
    }
}

impl Write for ChunkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let pool = self.pool;
        let chunk = self.current.get_or_insert_with(|| {
            let mut chunk = pool.get();
            chunk.reserve(CHUNK_SIZE);
            chunk
        });

        let take = buf.len().min(CHUNK_SIZE - chunk.len());
        chunk.extend_from_slice(&buf[..take]);
        if chunk.len() >= CHUNK_SIZE {
            self.ship_current()?;
        }
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ship_current()
    }
}

impl Drop for ChunkWriter<'_> {
    fn drop(&mut self) {
        if let Some(chunk) = self.current.take() {
            self.pool.put(chunk);
        }
    }
}

/// Read half: yields chunk bytes, recycling drained chunks
struct ChunkReader<'a> {
    rx: Receiver<Frame>,
    pool: &'a ElasticBufferPool,
    current: Option<BytesMut>,
    done: bool,
}

impl<'a> ChunkReader<'a> {
    fn new(rx: Receiver<Frame>, pool: &'a ElasticBufferPool) -> Self {
        Self {
            rx,
            pool,
            current: None,
            done: false,
        }
    }
}

impl Read for ChunkReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(chunk) = self.current.as_mut() {
                if chunk.has_remaining() {
                    let n = buf.len().min(chunk.remaining());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    chunk.advance(n);
                    return Ok(n);
                }
                if let Some(drained) = self.current.take() {
                    self.pool.put(drained);
                }
            }

            if self.done {
                return Ok(0);
            }

            match self.rx.recv() {
                Ok(Frame::Data(chunk)) => self.current = Some(chunk),
                Ok(Frame::End) => self.done = true,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "snapshot dump aborted",
                    ))
                }
            }
        }
    }
}

impl Drop for ChunkReader<'_> {
    fn drop(&mut self) {
        if let Some(chunk) = self.current.take() {
            self.pool.put(chunk);
        }
    }
}
