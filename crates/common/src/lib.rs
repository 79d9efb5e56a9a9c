//! abd-common: shared types for the ABD quorum register.
//!
//! Provides the `StampedValue` tuple and its total order, which both the
//! replica (conflict resolution) and the coordinator (read reduction) rely
//! on. The two sides must agree on this order, so it lives here and nowhere
//! else.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Logical write timestamp. Chosen by quorum election, never by wall clock.
pub type WriteTimestamp = u64;

/// Size of a majority quorum among `n` replicas.
pub fn majority(n: usize) -> usize {
    n / 2 + 1
}

// ---------------------------------------------------------------------------
// StampedValue
// ---------------------------------------------------------------------------

/// A value tagged with the timestamp and writer that produced it.
///
/// Ordered by `(timestamp, writer_id)`. The payload never takes part in the
/// comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedValue {
    pub value: Vec<u8>,
    pub timestamp: WriteTimestamp,
    pub writer_id: String,
}

impl StampedValue {
    pub fn new(value: Vec<u8>, timestamp: WriteTimestamp, writer_id: impl Into<String>) -> Self {
        Self {
            value,
            timestamp,
            writer_id: writer_id.into(),
        }
    }

    /// The "never written" sentinel: timestamp 0, no writer.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this is the sentinel (no writer ever produced it).
    pub fn is_empty(&self) -> bool {
        self.writer_id.is_empty()
    }

    /// Compare under the register's total order.
    pub fn cmp_order(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.writer_id.cmp(&other.writer_id))
    }

    /// Strictly greater under the total order.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.cmp_order(other) == Ordering::Greater
    }

    /// Reduce a set of stamped values to the greatest one. Returns the
    /// sentinel for an empty input.
    pub fn latest<I>(values: I) -> Self
    where
        I: IntoIterator<Item = StampedValue>,
    {
        values
            .into_iter()
            .fold(Self::empty(), |acc, v| if v.is_newer_than(&acc) { v } else { acc })
    }

    /// Serialize for the local storage engine.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize bytes previously produced by [`StampedValue::to_bytes`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(buf)
    }
}

impl fmt::Display for StampedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<empty>");
        }
        write!(
            f,
            "{}@{}/{}",
            DisplayKey(&self.value),
            self.timestamp,
            self.writer_id
        )
    }
}

// ---------------------------------------------------------------------------
// Writer ids
// ---------------------------------------------------------------------------

/// Build a writer id from a coordinator identity and its write counter.
///
/// The counter is zero-padded so ids from one coordinator sort in the order
/// they were minted.
pub fn writer_id(identity: &str, counter: u64) -> String {
    format!("{}:{:020}", identity, counter)
}

// ---------------------------------------------------------------------------
// Key display
// ---------------------------------------------------------------------------

/// Log-friendly rendering of an opaque byte string: UTF-8 when printable,
/// hex otherwise.
pub struct DisplayKey<'a>(pub &'a [u8]);

impl fmt::Display for DisplayKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{:?}", s),
            _ => write!(f, "0x{}", hex::encode(self.0)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(value: &str, ts: u64, writer: &str) -> StampedValue {
        StampedValue::new(value.as_bytes().to_vec(), ts, writer)
    }

    #[test]
    fn test_majority() {
        assert_eq!(majority(1), 1);
        assert_eq!(majority(2), 2);
        assert_eq!(majority(3), 2);
        assert_eq!(majority(4), 3);
        assert_eq!(majority(5), 3);
    }

    #[test]
    fn test_order_by_timestamp_first() {
        let older = sv("zzz", 1, "b");
        let newer = sv("aaa", 2, "a");
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
    }

    #[test]
    fn test_order_ties_broken_by_writer() {
        let a = sv("x", 5, "coord-a:1");
        let b = sv("y", 5, "coord-b:1");
        assert_eq!(a.cmp_order(&b), Ordering::Less);
        assert!(b.is_newer_than(&a));
    }

    #[test]
    fn test_order_ignores_payload() {
        let a = sv("one", 3, "w");
        let b = sv("two", 3, "w");
        assert_eq!(a.cmp_order(&b), Ordering::Equal);
        assert!(!a.is_newer_than(&b));
        assert!(!b.is_newer_than(&a));
    }

    #[test]
    fn test_empty_is_least() {
        let empty = StampedValue::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.timestamp, 0);
        assert!(sv("v", 0, "w").is_newer_than(&empty));
        assert!(sv("v", 1, "w").is_newer_than(&empty));
    }

    #[test]
    fn test_latest_picks_greatest_not_largest_payload() {
        let values = vec![sv("zzz", 1, "a"), sv("aaa", 2, "a"), sv("mmm", 2, "0")];
        let latest = StampedValue::latest(values);
        assert_eq!(latest.value, b"aaa");
        assert_eq!(latest.timestamp, 2);
    }

    #[test]
    fn test_latest_of_nothing_is_empty() {
        assert!(StampedValue::latest(Vec::new()).is_empty());
        assert!(StampedValue::latest(vec![StampedValue::empty()]).is_empty());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let v = StampedValue::new(vec![0, 159, 255], 42, "c:7");
        let decoded = StampedValue::from_bytes(&v.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(StampedValue::from_bytes(b"\x00\x01not json").is_err());
    }

    #[test]
    fn test_writer_ids_sort_by_counter() {
        let ids: Vec<String> = [9u64, 10, 11, 100].iter().map(|c| writer_id("c", *c)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_ne!(writer_id("c1", 1), writer_id("c", 11));
    }

    #[test]
    fn test_display_key() {
        assert_eq!(DisplayKey(b"abc").to_string(), "\"abc\"");
        assert_eq!(DisplayKey(&[0xff, 0x00]).to_string(), "0xff00");
    }
}
