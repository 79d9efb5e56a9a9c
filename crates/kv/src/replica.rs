//! Replica-side state: one stamped value per key plus the greatest
//! timestamp ever accepted.
//!
//! Writes resolve conflicts by last-writer-wins under the
//! `(timestamp, writer_id)` order. All three operations serialize on a
//! single mutex, so a compare-and-store is never interleaved with another.

use abd_common::{DisplayKey, StampedValue, WriteTimestamp};
use abd_storage::{FsyncPolicy, StorageEngine, StorageError};
use std::path::Path;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to encode stamped value: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
struct ReplicaState {
    engine: StorageEngine,
    most_recent_timestamp: WriteTimestamp,
}

/// Undecodable bytes count as absent.
fn decode(key: &[u8], bytes: &[u8]) -> Option<StampedValue> {
    match StampedValue::from_bytes(bytes) {
        Ok(sv) => Some(sv),
        Err(e) => {
            tracing::warn!(
                "ignoring undecodable value for key {}: {}",
                DisplayKey(key),
                e
            );
            abd_metrics::metrics().corrupt_records.inc();
            None
        }
    }
}

impl ReplicaState {
    fn stored(&self, key: &[u8]) -> Option<StampedValue> {
        let bytes = self.engine.get(key)?;
        decode(key, &bytes)
    }
}

/// A single replica of the register.
#[derive(Debug)]
pub struct Replica {
    state: Mutex<ReplicaState>,
}

impl Replica {
    /// Open the storage engine under `data_dir` and wrap it.
    pub fn open(data_dir: &Path, fsync: FsyncPolicy) -> Result<Self, StorageError> {
        Ok(Self::new(StorageEngine::open(data_dir, fsync)?))
    }

    /// Wrap an already opened engine. The most recent timestamp is rebuilt
    /// from whatever the engine holds.
    pub fn new(engine: StorageEngine) -> Self {
        let most_recent_timestamp = engine
            .iter()
            .filter_map(|(key, bytes)| decode(key, bytes))
            .map(|sv| sv.timestamp)
            .max()
            .unwrap_or(0);

        if engine.key_count() > 0 {
            tracing::info!(
                "replica recovered {} keys, most recent timestamp {}",
                engine.key_count(),
                most_recent_timestamp
            );
        }

        Self {
            state: Mutex::new(ReplicaState {
                engine,
                most_recent_timestamp,
            }),
        }
    }

    /// Greatest timestamp accepted for any key (0 if none).
    pub async fn most_recent_timestamp(&self) -> WriteTimestamp {
        self.state.lock().await.most_recent_timestamp
    }

    /// Offer `incoming` for `key`. Stores it when nothing is stored or it is
    /// strictly newer than the stored value. Returns whether it was stored.
    pub async fn local_write(
        &self,
        key: &[u8],
        incoming: &StampedValue,
    ) -> Result<bool, LocalStoreError> {
        let mut state = self.state.lock().await;
        let m = abd_metrics::metrics();

        if let Some(current) = state.stored(key) {
            if !incoming.is_newer_than(&current) {
                tracing::debug!(
                    "rejected write {} for key {}: stored {}",
                    incoming,
                    DisplayKey(key),
                    current
                );
                m.replica_writes_rejected.inc();
                return Ok(false);
            }
        }

        let bytes = incoming.to_bytes()?;
        state.engine.put(key, bytes)?;
        state.most_recent_timestamp = state.most_recent_timestamp.max(incoming.timestamp);
        m.replica_writes_accepted.inc();

        tracing::debug!("stored {} for key {}", incoming, DisplayKey(key));
        Ok(true)
    }

    /// Current value for `key`, or the empty sentinel.
    pub async fn local_read(&self, key: &[u8]) -> StampedValue {
        self.state
            .lock()
            .await
            .stored(key)
            .unwrap_or_else(StampedValue::empty)
    }

    /// Number of keys held.
    pub async fn key_count(&self) -> usize {
        self.state.lock().await.engine.key_count()
    }

    /// Flush the WAL (batch fsync mode).
    pub async fn sync(&self) -> Result<(), StorageError> {
        self.state.lock().await.engine.sync()
    }
}
