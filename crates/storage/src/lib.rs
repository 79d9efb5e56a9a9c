//! Storage engine for abd replicas: WAL + in-memory memtable.
//!
//! The engine is an opaque byte store (`get(key) -> bytes`,
//! `put(key, bytes)`). It knows nothing about stamped values or conflict
//! resolution; the replica layer encodes those into the stored bytes.

pub mod engine;
mod memtable;
pub mod record;
pub mod wal;

pub use engine::{StorageEngine, StorageError};
pub use record::StorageRecord;
pub use wal::FsyncPolicy;
