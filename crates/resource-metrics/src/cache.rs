//! Label-keyed metric cache with lazy TTL eviction.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use std::{collections::HashMap, fmt::Write as _, time::Duration};

use crate::descriptors::MetricSample;

/// Stable identity of a sample: SHA-256 over the descriptor string and `name,value` pairs
/// of variable labels (in declaration order), separated by `|`.
///
/// Two samples have equal fingerprints iff they belong to the same descriptor and all
/// their variable label values match.
pub fn fingerprint(sample: &MetricSample) -> String {
    let descriptor = sample.descriptor();
    let mut hasher = Sha256::new();
    hasher.update(descriptor.to_string().as_bytes());
    for (name, value) in descriptor
        .variable_labels()
        .iter()
        .zip(sample.label_values())
    {
        hasher.update(b"|");
        hasher.update(name.as_bytes());
        hasher.update(b",");
        hasher.update(value.as_bytes());
    }

    let digest = hasher.finalize();
    let mut fingerprint = String::with_capacity(digest.len() * 2);
    for byte in digest {
        write!(fingerprint, "{byte:02x}").unwrap();
        // ^ `unwrap()` is safe; writing to a string never fails.
    }
    fingerprint
}

#[derive(Debug)]
struct CachedSample {
    sample: MetricSample,
    inserted_at: Instant,
}

/// Cache of metric samples keyed by their [`fingerprint`].
///
/// A sample added to the cache is returned by [`Self::snapshot()`] until `ttl` elapses since its
/// insertion, or until it is overwritten by a sample with the same fingerprint. Expired samples
/// are removed lazily on snapshotting; there is no background eviction.
#[derive(Debug)]
pub struct MetricCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedSample>>,
}

impl MetricCache {
    /// Creates an empty cache with the specified TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::default(),
        }
    }

    /// Returns the TTL of samples in this cache.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Inserts `sample` into the cache, overwriting a previous sample with the same fingerprint.
    pub fn add_metric(&self, sample: MetricSample) {
        let key = fingerprint(&sample);
        let entry = CachedSample {
            sample,
            inserted_at: Instant::now(),
        };
        self.entries.lock().insert(key, entry);
    }

    /// Inserts multiple samples into the cache.
    pub fn add_metrics(&self, samples: impl IntoIterator<Item = MetricSample>) {
        let now = Instant::now();
        let samples: Vec<_> = samples
            .into_iter()
            .map(|sample| {
                let key = fingerprint(&sample);
                (
                    key,
                    CachedSample {
                        sample,
                        inserted_at: now,
                    },
                )
            })
            .collect();
        self.entries.lock().extend(samples);
    }

    /// Evicts expired samples and returns the remaining ones in no particular order.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| now.duration_since(entry.inserted_at) <= self.ttl);
        entries.values().map(|entry| entry.sample.clone()).collect()
    }

    /// Returns the number of cached samples, including the ones that may have expired.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Checks whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
