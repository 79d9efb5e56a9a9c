//! Storage record format.

use serde::{Deserialize, Serialize};

/// One `put` as written to the WAL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageRecord {
    /// The key (opaque bytes).
    pub key: Vec<u8>,
    /// The value (opaque bytes).
    pub value: Vec<u8>,
}

impl StorageRecord {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}
