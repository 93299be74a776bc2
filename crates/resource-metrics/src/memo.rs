//! Request-result memo used to dampen calls to rate-limited endpoints.

use parking_lot::Mutex;
use tokio::time::Instant;

use std::{collections::HashMap, error, fmt, time::Duration};

/// Reason why [`TtlMemo::get()`] did not return a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoMiss {
    /// No value was ever stored under the key (or it was evicted after expiry).
    Missing,
    /// The stored value has outlived its TTL; it is removed from the memo.
    Expired,
}

impl fmt::Display for MemoMiss {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Missing => "missing",
            Self::Expired => "expired",
        })
    }
}

impl error::Error for MemoMiss {}

#[derive(Debug)]
struct MemoEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

/// Value-typed TTL map. Unlike [`MetricCache`](crate::MetricCache), each entry has its own TTL
/// specified in whole seconds.
#[derive(Debug)]
pub struct TtlMemo<V> {
    entries: Mutex<HashMap<String, MemoEntry<V>>>,
}

impl<V> Default for TtlMemo<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> TtlMemo<V> {
    /// Creates an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the value stored under `id` if it's not expired.
    ///
    /// # Errors
    ///
    /// Returns the reason of a miss.
    pub fn get(&self, id: &str) -> Result<V, MemoMiss> {
        let mut entries = self.entries.lock();
        let entry = entries.get(id).ok_or(MemoMiss::Missing)?;
        if entry.stored_at.elapsed() > entry.ttl {
            entries.remove(id);
            return Err(MemoMiss::Expired);
        }
        Ok(entry.value.clone())
    }

    /// Stores `value` under `id` for `ttl_secs` seconds, replacing the previous value if any.
    pub fn store(&self, id: impl Into<String>, value: V, ttl_secs: u64) {
        let entry = MemoEntry {
            value,
            stored_at: Instant::now(),
            ttl: Duration::from_secs(ttl_secs),
        };
        self.entries.lock().insert(id.into(), entry);
    }

    /// Returns the number of stored entries (including expired ones not yet evicted).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Checks whether this memo is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
