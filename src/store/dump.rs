//! Native dump format
//!
//! Stream encoding of a whole bucket, produced from a read view and consumed
//! by restore.
//!
//! ## Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (6 bytes)                                        │
//! │   Magic: "RKVD" (4) | Version: u16 (2)                  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Record (repeated)                                       │
//! │   Tag: 0x01 (1) | CRC: u32 (4) | Len: u32 (4) | Data    │
//! │   Data = bincode { key, value }                         │
//! ├─────────────────────────────────────────────────────────┤
//! │ Trailer (9 bytes)                                       │
//! │   Tag: 0x00 (1) | EntryCount: u64 (8)                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! All integers are little endian. The CRC covers `Data`.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{ReplikvError, Result};

/// Magic bytes identifying a replikv dump stream
pub const MAGIC: &[u8; 4] = b"RKVD";

/// Current dump format version
pub const VERSION: u16 = 1;

/// Largest record accepted on read (64 MB)
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

const TAG_END: u8 = 0x00;
const TAG_RECORD: u8 = 0x01;

#[derive(Serialize)]
struct RecordRef<'a> {
    key: &'a [u8],
    value: &'a [u8],
}

#[derive(Deserialize)]
struct Record {
    key: Vec<u8>,
    value: Vec<u8>,
}

/// Writes a dump stream
pub struct DumpWriter<W: Write> {
    writer: W,
    /// Reused encoding buffer
    scratch: Vec<u8>,
    entry_count: u64,
}

impl<W: Write> DumpWriter<W> {
    /// Start a dump by writing the header
    pub fn new(mut writer: W) -> Result<Self> {
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        Ok(Self {
            writer,
            scratch: Vec::new(),
            entry_count: 0,
        })
    }

    pub fn write_record(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.scratch.clear();
        bincode::serialize_into(&mut self.scratch, &RecordRef { key, value })?;

        let len = u32::try_from(self.scratch.len())
            .ok()
            .filter(|len| *len <= MAX_RECORD_SIZE)
            .ok_or_else(|| {
                ReplikvError::SnapshotCorruption(format!(
                    "record too large: {} bytes (max {})",
                    self.scratch.len(),
                    MAX_RECORD_SIZE
                ))
            })?;
        let crc = crc32fast::hash(&self.scratch);

        self.writer.write_all(&[TAG_RECORD])?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&self.scratch)?;
        self.entry_count += 1;
        Ok(())
    }

    /// Write the trailer and flush; returns the number of records
    pub fn finish(mut self) -> Result<u64> {
        self.writer.write_all(&[TAG_END])?;
        self.writer.write_all(&self.entry_count.to_le_bytes())?;
        self.writer.flush()?;
        Ok(self.entry_count)
    }
}

/// Reads and validates a dump stream
pub struct DumpReader<R: Read> {
    reader: R,
    records_read: u64,
    finished: bool,
}

impl<R: Read> DumpReader<R> {
    /// Validate the header and position the reader at the first record
    pub fn new(mut reader: R) -> Result<Self> {
        let mut header = [0u8; 6];
        read_exact_or_corrupt(&mut reader, &mut header, "header")?;

        if &header[0..4] != MAGIC {
            return Err(ReplikvError::SnapshotCorruption(format!(
                "invalid dump magic: expected RKVD, got {:?}",
                &header[0..4]
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(ReplikvError::SnapshotCorruption(format!(
                "unsupported dump version: {}",
                version
            )));
        }

        Ok(Self {
            reader,
            records_read: 0,
            finished: false,
        })
    }

    /// Next `(key, value)`, or `None` once the trailer has been verified
    pub fn next_record(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.finished {
            return Ok(None);
        }

        let mut tag = [0u8; 1];
        read_exact_or_corrupt(&mut self.reader, &mut tag, "record tag")?;

        match tag[0] {
            TAG_RECORD => self.read_record().map(Some),
            TAG_END => {
                let mut count = [0u8; 8];
                read_exact_or_corrupt(&mut self.reader, &mut count, "trailer")?;
                let expected = u64::from_le_bytes(count);
                if expected != self.records_read {
                    return Err(ReplikvError::SnapshotCorruption(format!(
                        "trailer counts {} entries, stream held {}",
                        expected, self.records_read
                    )));
                }
                self.finished = true;
                Ok(None)
            }
            other => Err(ReplikvError::SnapshotCorruption(format!(
                "unknown record tag: 0x{:02x}",
                other
            ))),
        }
    }

    fn read_record(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut header = [0u8; 8];
        read_exact_or_corrupt(&mut self.reader, &mut header, "record header")?;
        let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if len > MAX_RECORD_SIZE {
            return Err(ReplikvError::SnapshotCorruption(format!(
                "record too large: {} bytes (max {})",
                len, MAX_RECORD_SIZE
            )));
        }

        let mut data = vec![0u8; len as usize];
        read_exact_or_corrupt(&mut self.reader, &mut data, "record body")?;

        let actual = crc32fast::hash(&data);
        if actual != crc {
            return Err(ReplikvError::SnapshotCorruption(format!(
                "record {} checksum mismatch: expected {:08x}, got {:08x}",
                self.records_read + 1,
                crc,
                actual
            )));
        }

        let record: Record = bincode::deserialize(&data)?;
        self.records_read += 1;
        Ok((record.key, record.value))
    }

    /// Records returned so far
    pub fn records_read(&self) -> u64 {
        self.records_read
    }
}

/// `read_exact` that reports a short stream as corruption rather than I/O
fn read_exact_or_corrupt<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
            ReplikvError::SnapshotCorruption(format!("dump truncated in {}", what)),
        ),
        Err(e) => Err(e.into()),
    }
}
