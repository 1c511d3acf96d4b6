//! Store Module
//!
//! Embedded transactional key/value store: one redb file, one named bucket.
//!
//! ## Responsibilities
//! - Open (or create) the store file and its bucket
//! - Transactional put/get/delete of raw bytes
//! - Point-in-time read views for snapshot dumps
//! - All-or-nothing restore from a dump stream
//!
//! ## Concurrency
//! redb serializes write transactions and gives every read transaction an
//! MVCC snapshot, so a `ReadView` keeps seeing one consistent state while
//! writers commit. All methods take `&self`; the handle is shared via `Arc`.

pub mod dump;

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use redb::{Database, DatabaseError, ReadTransaction, ReadableTable, TableDefinition};

use crate::config::Config;
use crate::error::{ReplikvError, Result};

type Bucket<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;

/// Pause between attempts to open a locked store file
const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Handle to the on-disk store
pub struct KvStore {
    db: Database,
    bucket: String,
    path: PathBuf,
}

impl KvStore {
    /// Open or create the store described by `config`
    ///
    /// On startup:
    /// 1. Create the data directory if needed
    /// 2. Open the file, retrying while another handle holds it, up to
    ///    `config.store_timeout`
    /// 3. Create the bucket if it does not exist yet
    pub fn open(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let path = config.store_path();
        let db = Self::open_database(&path, config.store_timeout)?;

        let store = Self {
            db,
            bucket: config.bucket_name.clone(),
            path,
        };
        store.ensure_bucket()?;

        tracing::info!(
            path = %store.path.display(),
            bucket = %store.bucket,
            "store opened"
        );
        Ok(store)
    }

    fn open_database(path: &Path, timeout: Duration) -> Result<Database> {
        let deadline = Instant::now() + timeout;
        loop {
            match Database::create(path) {
                Ok(db) => return Ok(db),
                Err(DatabaseError::DatabaseAlreadyOpen) if Instant::now() < deadline => {
                    thread::sleep(OPEN_RETRY_INTERVAL);
                }
                Err(DatabaseError::DatabaseAlreadyOpen) => {
                    return Err(ReplikvError::StoreTimeout(timeout));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn ensure_bucket(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.open_table(self.table())?;
        txn.commit()?;
        Ok(())
    }

    fn table(&self) -> Bucket<'_> {
        TableDefinition::new(&self.bucket)
    }

    /// Write `key → value` in its own transaction
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(self.table())?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Run `f` over the stored bytes for `key` inside a read transaction
    ///
    /// The slice borrows from the transaction, so callers decode or copy it
    /// without an intermediate allocation.
    pub fn view<T>(&self, key: &[u8], f: impl FnOnce(Option<&[u8]>) -> Result<T>) -> Result<T> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(self.table())?;
        let guard = table.get(key)?;
        let raw = guard.as_ref().map(|g| g.value());
        f(raw)
    }

    /// Copy out the stored bytes for `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.view(key, |raw| Ok(raw.map(<[u8]>::to_vec)))
    }

    /// Delete `key`; deleting an absent key is not an error
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(self.table())?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Open a point-in-time view over the whole bucket
    pub fn read_view(&self) -> Result<ReadView<'_>> {
        Ok(ReadView {
            txn: self.db.begin_read()?,
            bucket: self.table(),
        })
    }

    /// Number of entries in the bucket
    pub fn entry_count(&self) -> Result<u64> {
        let view = self.read_view()?;
        let table = view.txn.open_table(view.bucket)?;
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Replace the bucket's contents with the entries of a dump stream
    ///
    /// Runs in one write transaction that only commits once the dump's
    /// trailer has been validated. Any error leaves the old contents intact.
    pub fn restore_from<R: Read>(&self, reader: R) -> Result<u64> {
        let mut dump = dump::DumpReader::new(reader)?;

        let txn = self.db.begin_write()?;
        txn.delete_table(self.table())?;
        let restored = {
            let mut table = txn.open_table(self.table())?;
            while let Some((key, value)) = dump.next_record()? {
                table.insert(key.as_slice(), value.as_slice())?;
            }
            dump.records_read()
        };
        txn.commit()?;

        tracing::info!(entries = restored, bucket = %self.bucket, "store restored");
        Ok(restored)
    }

    /// Close the store, releasing the file
    pub fn close(self) -> Result<()> {
        tracing::info!(path = %self.path.display(), "store closed");
        drop(self.db);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }
}

/// A read-only transaction spanning the whole bucket
pub struct ReadView<'a> {
    txn: ReadTransaction,
    bucket: Bucket<'a>,
}

impl ReadView<'_> {
    /// Serialize every entry visible to this view in the native dump format
    ///
    /// Returns the number of entries written.
    pub fn dump_to<W: Write>(&self, writer: W) -> Result<u64> {
        let table = self.txn.open_table(self.bucket)?;
        let mut dump = dump::DumpWriter::new(writer)?;
        for entry in table.iter()? {
            let (key, value) = entry?;
            dump.write_record(key.value(), value.value())?;
        }
        dump.finish()
    }

    /// Look up a key as of this view
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(self.bucket)?;
        let value = table.get(key)?.map(|guard| guard.value().to_vec());
        Ok(value)
    }
}
