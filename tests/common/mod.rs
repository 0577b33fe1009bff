//! Test doubles and harness shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use storegate::cache::MemoryBackend;
use storegate::common::{CacheBackendKind, ManualClock, PrimaryError, QueryShape};
use storegate::fallback::FallbackCoordinator;
use storegate::gateway::{PrimaryStore, WriteOperation};
use storegate::{CircuitState, Config, Gateway};

/// In-memory primary store with call counters and a health switch.
///
/// Queries return `{"items": [...]}` holding every document of the
/// collection whose top-level fields equal the filter values.
pub struct MockPrimary {
    healthy: AtomicBool,
    reject_writes: AtomicBool,
    queries: AtomicUsize,
    writes: AtomicUsize,
    pings: AtomicUsize,
    documents: Mutex<HashMap<String, Vec<Value>>>,
}

impl MockPrimary {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
            reject_writes: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            documents: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn seed(&self, collection: &str, documents: Vec<Value>) {
        self.documents
            .lock()
            .unwrap()
            .insert(collection.to_string(), documents);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), PrimaryError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PrimaryError::Unavailable("connection refused".into()))
        }
    }
}

#[async_trait]
impl PrimaryStore for MockPrimary {
    async fn query(&self, collection: &str, shape: &QueryShape) -> Result<Bytes, PrimaryError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let documents = self.documents.lock().unwrap();
        let items: Vec<&Value> = documents
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| shape.filter.iter().all(|(k, v)| doc.get(k) == Some(v)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Bytes::from(json!({ "items": items }).to_string()))
    }

    async fn write(&self, collection: &str, op: &WriteOperation) -> Result<Bytes, PrimaryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(PrimaryError::Rejected("validation failed: price must be positive".into()));
        }

        if let WriteOperation::Insert { document } = op {
            self.documents
                .lock()
                .unwrap()
                .entry(collection.to_string())
                .or_default()
                .push(document.clone());
        }
        Ok(Bytes::from(json!({ "ok": true, "action": op.action() }).to_string()))
    }

    async fn ping(&self) -> Result<(), PrimaryError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.check()
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.cache.backend = CacheBackendKind::Memory;
    config.cache.timeout_ms = 50;
    config.primary.query_timeout_ms = 200;
    config.primary.write_timeout_ms = 200;
    config.health.probe_timeout_ms = 200;
    config
}

pub struct Harness {
    pub gateway: Arc<Gateway>,
    pub coordinator: Arc<FallbackCoordinator>,
    pub primary: Arc<MockPrimary>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let primary = MockPrimary::new();
        let clock = ManualClock::default();
        let coordinator = Arc::new(FallbackCoordinator::new(
            &config.health,
            Arc::new(clock.clone()),
        ));
        let gateway = Arc::new(Gateway::new(
            &config,
            primary.clone(),
            Arc::new(MemoryBackend::new()),
            Arc::clone(&coordinator),
            Arc::new(clock.clone()),
        ));
        Self {
            gateway,
            coordinator,
            primary,
            clock,
        }
    }

    /// Drive `n` health probes by hand.
    pub async fn probes(&self, n: usize) {
        for _ in 0..n {
            self.gateway.monitor().probe_once().await;
        }
    }

    /// Primary goes down and the monitor notices.
    pub async fn go_down(&self) {
        self.primary.set_healthy(false);
        self.probes(3).await;
        assert_eq!(self.state(), CircuitState::Degraded);
    }

    /// Primary comes back and serves a full probation.
    pub async fn recover(&self) {
        self.primary.set_healthy(true);
        self.probes(3).await;
        assert_eq!(self.state(), CircuitState::Normal);
    }

    pub fn state(&self) -> CircuitState {
        self.gateway.coordinator().state()
    }
}

pub fn supergains() -> QueryShape {
    QueryShape::new().filter("brand", "SuperGains")
}

pub fn seed_products(primary: &MockPrimary) {
    primary.seed(
        "products",
        vec![
            json!({ "id": "p1", "brand": "SuperGains", "name": "Whey 2kg", "price": 49 }),
            json!({ "id": "p2", "brand": "SuperGains", "name": "Creatine 500g", "price": 19 }),
            json!({ "id": "p3", "brand": "IronFuel", "name": "BCAA", "price": 25 }),
        ],
    );
}
