//! In-memory table for fast key lookups.

use crate::record::StorageRecord;
use std::collections::HashMap;

/// Latest bytes per key. Later puts overwrite earlier ones unconditionally;
/// deciding whether a put should happen at all is the caller's job.
#[derive(Debug, Default)]
pub struct Memtable {
    data: HashMap<Vec<u8>, Vec<u8>>,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    pub fn put(&mut self, record: StorageRecord) {
        self.data.insert(record.key, record.value);
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Iterate over `(key, value)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.data.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }
}
