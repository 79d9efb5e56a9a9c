//! Write-Ahead Log (WAL) for durability.
//!
//! Format: each entry is `[4-byte CRC32][4-byte length][JSON payload]\n`.
//! Replay returns every valid entry up to the first torn or corrupt one,
//! together with the byte length of that valid prefix. Anything past it
//! must be cut off with [`Wal::truncate`] before appending again, otherwise
//! new entries land behind the bad one and are never replayed.

use crate::record::StorageRecord;
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Fsync policy for the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync after every write.
    Always,
    /// Fsync periodically (caller drives `sync`).
    Batch,
    /// Never explicitly fsync (OS decides).
    None,
}

impl FsyncPolicy {
    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "always" => Self::Always,
            "none" => Self::None,
            _ => Self::Batch,
        }
    }
}

/// Outcome of [`Wal::replay`].
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<StorageRecord>,
    /// Bytes covered by `records`.
    pub valid_len: u64,
    /// Size of the file when it was read.
    pub file_len: u64,
}

impl Replay {
    /// Whether the file ends in a torn or corrupt tail.
    pub fn has_bad_tail(&self) -> bool {
        self.file_len > self.valid_len
    }
}

/// An append-only write-ahead log.
#[derive(Debug)]
pub struct Wal {
    writer: BufWriter<File>,
    fsync: FsyncPolicy,
}

impl Wal {
    /// Open or create a WAL file at the given path.
    pub fn open(path: &Path, fsync: FsyncPolicy) -> Result<Self, WalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            fsync,
        })
    }

    /// Append a record and flush it to the OS.
    pub fn append(&mut self, record: &StorageRecord) -> Result<(), WalError> {
        let payload = serde_json::to_vec(record)?;
        let crc = checksum(&payload);

        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        if self.fsync == FsyncPolicy::Always {
            self.writer.get_ref().sync_data()?;
        }

        Ok(())
    }

    /// Explicitly fsync the WAL (for batch mode).
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Replay all valid entries from a WAL file, in write order.
    pub fn replay(path: &Path) -> Result<Replay, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(WalError::Io(e)),
        };
        let file_len = file.metadata()?.len();

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut valid_len = 0u64;

        loop {
            match read_entry(&mut reader)? {
                Entry::Record(record, entry_len) => {
                    records.push(record);
                    valid_len += entry_len;
                }
                Entry::Eof => break,
                Entry::Torn => {
                    tracing::warn!(
                        "WAL truncated mid-entry after {} record(s); stopping replay",
                        records.len()
                    );
                    break;
                }
                Entry::Corrupt(reason) => {
                    tracing::warn!(
                        "WAL entry {} is corrupt ({}); stopping replay",
                        records.len(),
                        reason
                    );
                    break;
                }
            }
        }

        Ok(Replay {
            records,
            valid_len,
            file_len,
        })
    }

    /// Cut the file at `path` down to `len` bytes and sync the new length.
    pub fn truncate(path: &Path, len: u64) -> Result<(), WalError> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Upper bound on a single encoded record; a larger length prefix is
/// treated as corruption rather than allocated.
const MAX_ENTRY_LEN: u32 = 64 * 1024 * 1024;

/// CRC, length prefix and trailing newline.
const ENTRY_OVERHEAD: u64 = 9;

enum Entry {
    /// A decoded record and the number of bytes it occupied.
    Record(StorageRecord, u64),
    Eof,
    Torn,
    Corrupt(String),
}

/// Fill `buf` completely. `Ok(false)` means the file ended first.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, WalError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(WalError::Io(e)),
    }
}

fn read_entry<R: Read>(reader: &mut R) -> Result<Entry, WalError> {
    let mut crc_buf = [0u8; 4];
    if !fill(reader, &mut crc_buf)? {
        // A clean EOF lands exactly on an entry boundary.
        return Ok(Entry::Eof);
    }
    let expected = u32::from_le_bytes(crc_buf);

    let mut len_buf = [0u8; 4];
    if !fill(reader, &mut len_buf)? {
        return Ok(Entry::Torn);
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_ENTRY_LEN {
        return Ok(Entry::Corrupt(format!("entry length {} exceeds limit", len)));
    }
    let mut payload = vec![0u8; len as usize];
    if !fill(reader, &mut payload)? {
        return Ok(Entry::Torn);
    }
    let mut nl = [0u8; 1];
    if !fill(reader, &mut nl)? {
        return Ok(Entry::Torn);
    }

    let actual = checksum(&payload);
    if actual != expected {
        return Ok(Entry::Corrupt(format!(
            "crc expected {:#010x}, got {:#010x}",
            expected, actual
        )));
    }

    match serde_json::from_slice(&payload) {
        Ok(record) => Ok(Entry::Record(record, ENTRY_OVERHEAD + u64::from(len))),
        Err(e) => Ok(Entry::Corrupt(e.to_string())),
    }
}
