//! Snapshot Module
//!
//! Persisting a point-in-time copy of the store into a sink supplied by the
//! consensus engine.
//!
//! ## Persist Flow
//! ```text
//!  StoreSnapshot::persist(sink)
//!        │
//!        ├── open read view (isolated from later applies)
//!        │
//!        ├── compression off:  dump ─────────────────────────► sink
//!        │
//!        ├── compression on:   dump ══► pipeline ══► zstd ───► sink
//!        │
//!        └── Ok  → sink.close()
//!            Err → sink.cancel(), error returned
//! ```

mod pipeline;
mod sink;

use std::io::Write;
use std::sync::Arc;

use crate::error::Result;
use crate::fsm::FsmSnapshot;
use crate::pool::ElasticBufferPool;
use crate::store::KvStore;

pub use pipeline::{CHUNK_SIZE, PIPELINE_DEPTH};
pub use sink::{FileSnapshotSink, SnapshotSink};

/// Snapshot handle returned by `KvStateMachine::snapshot`
///
/// Holds only shared handles; the read view backing a persist is opened
/// when `persist` starts and closed when it returns.
pub struct StoreSnapshot {
    store: Arc<KvStore>,
    buffers: Arc<ElasticBufferPool>,
    use_compression: bool,
}

impl StoreSnapshot {
    pub fn new(store: Arc<KvStore>, buffers: Arc<ElasticBufferPool>, use_compression: bool) -> Self {
        Self {
            store,
            buffers,
            use_compression,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.use_compression
    }

    fn write_to(&self, sink: &mut dyn SnapshotSink) -> Result<u64> {
        let view = self.store.read_view()?;
        if self.use_compression {
            pipeline::compress_into(&view, sink, &self.buffers)
        } else {
            let count = view.dump_to(&mut *sink)?;
            sink.flush()?;
            Ok(count)
        }
    }
}

impl FsmSnapshot for StoreSnapshot {
    fn persist(&self, sink: &mut dyn SnapshotSink) -> Result<()> {
        match self.write_to(sink) {
            Ok(entries) => {
                sink.close()?;
                tracing::info!(
                    id = sink.id(),
                    entries,
                    compressed = self.use_compression,
                    "snapshot persisted"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(id = sink.id(), error = %e, "snapshot persist failed");
                if let Err(cancel_err) = sink.cancel() {
                    tracing::warn!(id = sink.id(), error = %cancel_err, "snapshot cancel failed");
                }
                Err(e)
            }
        }
    }

    fn release(&mut self) {
        tracing::trace!("snapshot released");
    }
}
