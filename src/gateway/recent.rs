//! Window of recently served queries
//!
//! Remembers the last N distinct fingerprints the gateway served from the
//! primary store, with enough of the query to run it again. Resync walks
//! this window after the circuit closes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use crate::common::{Fingerprint, QueryShape};

#[derive(Debug, Clone, PartialEq)]
pub struct RecentQuery {
    pub collection: String,
    pub fingerprint: Fingerprint,
    pub shape: QueryShape,
}

#[derive(Debug, Default)]
struct Window {
    by_fingerprint: HashMap<Fingerprint, (u64, RecentQuery)>,
    order: BTreeMap<u64, Fingerprint>,
    next_seq: u64,
}

#[derive(Debug)]
pub struct RecentQueries {
    capacity: usize,
    inner: Mutex<Window>,
}

impl RecentQueries {
    /// Create a new window holding at most `capacity` queries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Window::default()),
        }
    }

    /// Note a served query. Re-noting moves it to the newest position.
    pub fn record(&self, collection: &str, fingerprint: &Fingerprint, shape: &QueryShape) {
        if self.capacity == 0 {
            return;
        }
        let mut w = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let seq = w.next_seq;
        w.next_seq += 1;

        if let Some((old_seq, _)) = w.by_fingerprint.remove(fingerprint) {
            w.order.remove(&old_seq);
        }
        w.order.insert(seq, fingerprint.clone());
        w.by_fingerprint.insert(
            fingerprint.clone(),
            (
                seq,
                RecentQuery {
                    collection: collection.to_string(),
                    fingerprint: fingerprint.clone(),
                    shape: shape.clone(),
                },
            ),
        );

        while w.by_fingerprint.len() > self.capacity {
            match w.order.pop_first() {
                Some((_, oldest)) => {
                    w.by_fingerprint.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Newest first.
    pub fn snapshot(&self) -> Vec<RecentQuery> {
        let w = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        w.order
            .values()
            .rev()
            .filter_map(|fp| w.by_fingerprint.get(fp).map(|(_, q)| q.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_fingerprint
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
