//! Memory snapshot store
//!
//! Last-resort, process-local copy of recent primary-store reads. Each
//! collection has its own bucket behind its own mutex, so captures and
//! reads on different collections never contend.
//!
//! Buckets are bounded. When a capture pushes a bucket past its capacity,
//! the entry with the oldest `captured_at` is dropped. Reads do not refresh
//! an entry's position: freshness, not popularity, decides retention.
//!
//! The number of buckets is bounded too. Collection names arrive from
//! clients, so once `max_collections` buckets exist, captures for unknown
//! collections are skipped. Collections with a configured capacity always
//! get a bucket.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use crate::common::{Clock, Fingerprint, SnapshotConfig};

/// Entry count per collection
pub type SnapshotSizes = BTreeMap<String, usize>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub collection: String,
    pub fingerprint: Fingerprint,
    pub payload: Bytes,
    pub captured_at: DateTime<Utc>,
}

/// Eviction order: capture time, then capture sequence for ties.
type Age = (DateTime<Utc>, u64);

#[derive(Debug)]
struct Bucket {
    capacity: usize,
    entries: HashMap<Fingerprint, (Age, SnapshotEntry)>,
    by_age: BTreeMap<Age, Fingerprint>,
    next_seq: u64,
}

impl Bucket {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            by_age: BTreeMap::new(),
            next_seq: 0,
        }
    }

    fn insert(&mut self, entry: SnapshotEntry) -> usize {
        let age = (entry.captured_at, self.next_seq);
        self.next_seq += 1;

        if let Some((old_age, _)) = self.entries.remove(&entry.fingerprint) {
            self.by_age.remove(&old_age);
        }
        self.by_age.insert(age, entry.fingerprint.clone());
        self.entries.insert(entry.fingerprint.clone(), (age, entry));

        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            match self.by_age.pop_first() {
                Some((_, oldest)) => {
                    self.entries.remove(&oldest);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

/// Process-local snapshot of recent primary reads, bucketed per collection.
pub struct SnapshotStore {
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
    config: SnapshotConfig,
    clock: Arc<dyn Clock>,
}

impl SnapshotStore {
    /// Create an empty store sized by `config`.
    pub fn new(config: SnapshotConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
            clock,
        }
    }

    fn bucket(&self, collection: &str) -> Option<Arc<Mutex<Bucket>>> {
        self.buckets.get(collection).map(|b| Arc::clone(b.value()))
    }

    /// `None` when a new bucket would exceed `max_collections`.
    fn bucket_or_create(&self, collection: &str) -> Option<Arc<Mutex<Bucket>>> {
        if let Some(bucket) = self.bucket(collection) {
            return Some(bucket);
        }
        if !self.config.is_configured(collection)
            && self.buckets.len() >= self.config.max_collections
        {
            return None;
        }
        let capacity = self.config.capacity_for(collection);
        Some(Arc::clone(
            self.buckets
                .entry(collection.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Bucket::new(capacity))))
                .value(),
        ))
    }

    /// Record a successful primary read. The caller guarantees the circuit
    /// is NORMAL. Returns `false` if the collection was refused a bucket.
    pub fn capture(&self, collection: &str, fingerprint: &Fingerprint, payload: Bytes) -> bool {
        let Some(bucket) = self.bucket_or_create(collection) else {
            tracing::debug!(
                collection = %collection,
                max_collections = self.config.max_collections,
                "snapshot collection limit reached, capture skipped"
            );
            return false;
        };

        let entry = SnapshotEntry {
            collection: collection.to_string(),
            fingerprint: fingerprint.clone(),
            payload,
            captured_at: self.clock.now(),
        };

        let evicted = bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry);

        if evicted > 0 {
            tracing::trace!(collection = %collection, evicted, "snapshot bucket at capacity");
        }
        true
    }

    /// Payload captured for `fingerprint`, if any. Does not touch eviction order.
    pub fn read(&self, collection: &str, fingerprint: &Fingerprint) -> Option<Bytes> {
        self.entry(collection, fingerprint).map(|e| e.payload)
    }

    /// Full entry, including when it was captured.
    pub fn entry(&self, collection: &str, fingerprint: &Fingerprint) -> Option<SnapshotEntry> {
        let bucket = self.bucket(collection)?;
        let guard = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entries.get(fingerprint).map(|(_, e)| e.clone())
    }

    /// Number of entries held for `collection`; 0 if it has no bucket.
    pub fn size_of(&self, collection: &str) -> usize {
        self.bucket(collection)
            .map(|b| b.lock().unwrap_or_else(PoisonError::into_inner).entries.len())
            .unwrap_or(0)
    }

    /// Entry counts for every collection with a bucket.
    pub fn sizes(&self) -> SnapshotSizes {
        let buckets: Vec<(String, Arc<Mutex<Bucket>>)> = self
            .buckets
            .iter()
            .map(|b| (b.key().clone(), Arc::clone(b.value())))
            .collect();

        buckets
            .into_iter()
            .map(|(collection, bucket)| {
                let len = bucket
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entries
                    .len();
                (collection, len)
            })
            .collect()
    }
}
