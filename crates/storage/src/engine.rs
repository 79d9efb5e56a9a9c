//! Byte store used by a replica: a write-ahead log for durability and a
//! memtable for reads.
//!
//! The engine never interprets values. Whatever the last successful `put`
//! for a key wrote is what `get` returns, before and after a restart.

use crate::memtable::Memtable;
use crate::record::StorageRecord;
use crate::wal::{FsyncPolicy, Wal, WalError};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("cannot create data directory {path:?}: {source}")]
    DataDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Synchronous engine; the replica owns the async boundary and the lock.
#[derive(Debug)]
pub struct StorageEngine {
    memtable: Memtable,
    wal: Wal,
}

impl StorageEngine {
    pub const WAL_FILE: &'static str = "wal.log";

    /// Open `data_dir` (created if missing) and rebuild the memtable from
    /// its log.
    pub fn open(data_dir: &Path, fsync: FsyncPolicy) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir).map_err(|source| StorageError::DataDir {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let wal_path = data_dir.join(Self::WAL_FILE);

        let replay = Wal::replay(&wal_path)?;
        if replay.has_bad_tail() {
            tracing::warn!(
                "discarding {} bytes of torn or corrupt log tail in {:?}",
                replay.file_len - replay.valid_len,
                wal_path
            );
            Wal::truncate(&wal_path, replay.valid_len)?;
        }

        let entries = replay.records.len();
        let memtable = replay
            .records
            .into_iter()
            .fold(Memtable::new(), |mut table, record| {
                table.put(record);
                table
            });

        tracing::info!(
            "replayed {} log entries into {} keys from {:?}",
            entries,
            memtable.len(),
            wal_path
        );

        Ok(Self {
            memtable,
            wal: Wal::open(&wal_path, fsync)?,
        })
    }

    /// Bytes last stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.memtable.get(key).map(<[u8]>::to_vec)
    }

    /// Log first, then make the value visible to `get`.
    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        let record = StorageRecord::new(key.to_vec(), value);
        self.wal.append(&record)?;
        self.memtable.put(record);
        Ok(())
    }

    pub fn key_count(&self) -> usize {
        self.memtable.len()
    }

    /// Every stored `(key, value)` pair, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.memtable.iter()
    }

    /// Force logged entries to disk; driven periodically under
    /// [`FsyncPolicy::Batch`].
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.wal.sync()?;
        Ok(())
    }
}
