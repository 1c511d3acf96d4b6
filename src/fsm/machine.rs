//! Key/value state machine
//!
//! Applies decoded commands to the store, hands out snapshots and restores
//! from them.

use std::io::{self, Read};
use std::sync::Arc;

use bytes::BufMut;
use serde_json::Value;

use super::{
    empty_mapping, ApplyResult, CommandPayload, LogEntry, LogType, Operation, StateMachine,
};
use crate::config::{Config, COMPRESSION_LEVEL};
use crate::error::{ReplikvError, Result};
use crate::pool::{BoundedBytePool, ElasticBufferPool};
use crate::snapshot::StoreSnapshot;
use crate::store::KvStore;

/// First four bytes of every zstd frame
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// State machine over a `KvStore`
///
/// ## Concurrency
/// `apply` relies on the engine's single-writer discipline and is not
/// serialized here. Snapshots share the store through `Arc` and depend on
/// the store's read isolation, not on any lock of ours.
pub struct KvStateMachine {
    store: Arc<KvStore>,

    /// Growable buffers for value encoding and decompression
    buffers: Arc<ElasticBufferPool>,

    /// Output buffers for compressed values
    compressed: BoundedBytePool,

    use_compression: bool,
}

impl KvStateMachine {
    /// Open the store and build the pools described by `config`
    pub fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(KvStore::open(config)?);
        Ok(Self::with_store(store, config))
    }

    /// Build a state machine over an already opened store
    pub fn with_store(store: Arc<KvStore>, config: &Config) -> Self {
        Self {
            store,
            buffers: Arc::new(ElasticBufferPool::from_config(config)),
            compressed: BoundedBytePool::from_config(config),
            use_compression: config.use_compression,
        }
    }

    pub fn store(&self) -> &Arc<KvStore> {
        &self.store
    }

    pub fn uses_compression(&self) -> bool {
        self.use_compression
    }

    /// Encode, optionally compress, and store a value
    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let mut encoded = self.buffers.checkout();
        serde_json::to_writer((&mut *encoded).writer(), value)?;

        if self.use_compression {
            let mut compressed = self.compressed.checkout();
            zstd::stream::copy_encode(&encoded[..], &mut *compressed, COMPRESSION_LEVEL)?;
            self.store.put(key.as_bytes(), &compressed)
        } else {
            self.store.put(key.as_bytes(), &encoded)
        }
    }

    /// Fetch and decode a value; an empty result is the empty mapping
    fn get(&self, key: &str) -> Result<Value> {
        let mut decoded = self.buffers.checkout();

        self.store.view(key.as_bytes(), |raw| {
            let Some(raw) = raw else {
                return Ok(());
            };
            if self.use_compression {
                zstd::stream::copy_decode(raw, (&mut *decoded).writer())?;
            } else {
                decoded.extend_from_slice(raw);
            }
            Ok(())
        })?;

        if decoded.is_empty() {
            return Ok(empty_mapping());
        }
        Ok(serde_json::from_slice(&decoded)?)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(key.as_bytes())
    }
}

impl StateMachine for KvStateMachine {
    type Snapshot = StoreSnapshot;

    fn apply(&self, entry: &LogEntry) -> Option<ApplyResult> {
        if entry.kind != LogType::Command {
            tracing::debug!(index = entry.index, kind = %entry.kind, "not a command entry");
            return None;
        }

        let payload = match CommandPayload::decode(&entry.data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(index = entry.index, error = %e, "malformed command payload");
                return Some(ApplyResult::failed(e, Value::Null));
            }
        };

        let operation = match payload.operation() {
            Ok(op) => op,
            Err(e) => {
                tracing::warn!(index = entry.index, error = %e, "skipping command");
                return None;
            }
        };

        tracing::trace!(index = entry.index, op = %operation, key = %payload.key, "apply");

        let result = match operation {
            Operation::Set => match self.set(&payload.key, &payload.value) {
                Ok(()) => ApplyResult::ok(payload.value),
                Err(e) => ApplyResult::failed(e, payload.value),
            },
            Operation::Get => match self.get(&payload.key) {
                Ok(value) => ApplyResult::ok(value),
                Err(e) => ApplyResult::failed(e, empty_mapping()),
            },
            Operation::Delete => match self.delete(&payload.key) {
                Ok(()) => ApplyResult::ok(Value::Null),
                Err(e) => ApplyResult::failed(e, Value::Null),
            },
        };

        if let Some(e) = &result.error {
            tracing::warn!(index = entry.index, op = %operation, key = %payload.key, error = %e, "apply failed");
        }
        Some(result)
    }

    fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(StoreSnapshot::new(
            Arc::clone(&self.store),
            Arc::clone(&self.buffers),
            self.use_compression,
        ))
    }

    /// Accepts both plain and zstd-compressed dumps, told apart by the zstd
    /// frame magic. The stream must match this node's compression setting.
    fn restore(&self, mut source: Box<dyn Read + Send>) -> Result<()> {
        let mut head = [0u8; 4];
        let filled = read_up_to(&mut source, &mut head)?;
        let compressed = head[..filled] == ZSTD_MAGIC;
        let stream = (&head[..filled]).chain(source);

        // Stored values carry the same encoding as the stream that held them
        if compressed != self.use_compression {
            tracing::error!(
                compressed_stream = compressed,
                use_compression = self.use_compression,
                "snapshot compression differs from node setting"
            );
            return Err(ReplikvError::CompressionMismatch {
                stream: compressed,
                node: self.use_compression,
            });
        }

        let restored = if compressed {
            self.store.restore_from(zstd::stream::read::Decoder::new(stream)?)?
        } else {
            self.store.restore_from(stream)?
        };

        tracing::info!(entries = restored, compressed, "state machine restored");
        Ok(())
    }
}

/// Fill `buf` as far as the stream allows; returns the bytes read
fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
