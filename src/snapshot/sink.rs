//! Snapshot sinks
//!
//! Single-use write targets with an explicit commit/cancel outcome.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Write target supplied by the consensus engine
///
/// Exactly one of `close` (commit) or `cancel` (discard) is signaled per
/// persist.
pub trait SnapshotSink: Write + Send {
    /// Identifier of the snapshot being written
    fn id(&self) -> &str;

    /// All data written; make the snapshot durable
    fn close(&mut self) -> io::Result<()>;

    /// Abort; discard anything written so far
    fn cancel(&mut self) -> io::Result<()>;
}

/// Sink writing `{dir}/{id}.tmp`, renamed to `{dir}/{id}.snap` on commit
pub struct FileSnapshotSink {
    id: String,
    tmp_path: PathBuf,
    final_path: PathBuf,
    /// `None` once the sink has been closed or cancelled
    writer: Option<BufWriter<File>>,
}

impl FileSnapshotSink {
    pub const EXTENSION: &'static str = "snap";

    pub fn create(dir: &Path, id: impl Into<String>) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let id = id.into();
        let tmp_path = dir.join(format!("{}.tmp", id));
        let final_path = dir.join(format!("{}.{}", id, Self::EXTENSION));
        let file = File::create(&tmp_path)?;

        Ok(Self {
            id,
            tmp_path,
            final_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Where the snapshot lands once committed
    pub fn path(&self) -> &Path {
        &self.final_path
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(already_finished)
    }
}

fn already_finished() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "snapshot sink already finished")
}

impl Write for FileSnapshotSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn close(&mut self) -> io::Result<()> {
        let writer = self.writer.take().ok_or_else(already_finished)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&self.tmp_path, &self.final_path)?;
        tracing::debug!(id = %self.id, path = %self.final_path.display(), "snapshot committed");
        Ok(())
    }

    fn cancel(&mut self) -> io::Result<()> {
        let writer = self.writer.take().ok_or_else(already_finished)?;
        drop(writer);
        match fs::remove_file(&self.tmp_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tracing::debug!(id = %self.id, "snapshot cancelled");
        Ok(())
    }
}
