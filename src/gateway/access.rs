//! Read and write protocols
//!
//! Read, circuit NORMAL:
//!   shared cache hit → serve (`cache`)
//!   miss → primary → write-through + snapshot capture → serve (`primary`)
//!   transient primary failure → report to monitor, continue as degraded
//!
//! Read, circuit DEGRADED / RECOVERING:
//!   shared cache hit → serve (`cache`, degraded)
//!   snapshot hit → serve (`memory`, degraded)
//!   nothing → unavailable
//!
//! Write: rejected unless NORMAL; after a successful primary write every
//! shared-tier entry of the collection is invalidated. Snapshots are left
//! to age out.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::cache::{CacheBackend, SharedCache, SharedCacheHealth, SnapshotSizes, SnapshotStore};
use crate::common::{
    fingerprint, Clock, Config, Fingerprint, GatewayMetrics, PrimaryError, QueryShape,
};
use crate::fallback::{CircuitState, FallbackCoordinator, HealthMonitor};
use crate::gateway::primary::{PrimaryStore, WriteOperation};
use crate::gateway::recent::RecentQueries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadSource {
    Primary,
    Cache,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub data: Bytes,
    pub cached: bool,
    pub degraded: bool,
    pub source: ReadSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Served(ReadResponse),
    /// No tier could answer. Expected while degraded, not an error.
    Unavailable { circuit_state: CircuitState },
    /// The primary store refused the query itself.
    Rejected(String),
}

impl ReadOutcome {
    /// The response, if some tier answered.
    pub fn served(self) -> Option<ReadResponse> {
        match self {
            ReadOutcome::Served(response) => Some(response),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ReadOutcome::Unavailable { .. })
    }
}

/// Machine-readable reason a write did not reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Circuit open
    Degraded,
    /// Circuit on probation
    Recovering,
    /// Circuit closed but the write itself hit a transient failure
    PrimaryUnavailable,
    /// The store refused the write
    StoreRejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRejection {
    pub reason: RejectReason,
    pub circuit_state: CircuitState,
    pub message: String,
}

impl WriteRejection {
    /// True when the layer refused the write because the primary is not
    /// trusted, as opposed to the store refusing it.
    pub fn is_read_only(&self) -> bool {
        !matches!(self.reason, RejectReason::StoreRejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied(Bytes),
    Rejected(WriteRejection),
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }

    /// Why the write was refused, if it was.
    pub fn rejection(&self) -> Option<&WriteRejection> {
        match self {
            WriteOutcome::Rejected(r) => Some(r),
            WriteOutcome::Applied(_) => None,
        }
    }
}

/// Operational view of the layer. Building one has no side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub is_primary_available: bool,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub consecutive_successes: u32,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub memory_cache_sizes: SnapshotSizes,
    pub shared_cache: SharedCacheHealth,
    pub fallback_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub attempted: usize,
    pub refreshed: usize,
    pub failed: usize,
    /// The circuit left NORMAL before the window was exhausted
    pub aborted: bool,
}

/// Tiered read/write front for one primary store.
pub struct Gateway {
    primary: Arc<dyn PrimaryStore>,
    shared: SharedCache,
    snapshots: SnapshotStore,
    coordinator: Arc<FallbackCoordinator>,
    monitor: Arc<HealthMonitor>,
    recent: RecentQueries,
    metrics: Arc<GatewayMetrics>,
    query_timeout: Duration,
    write_timeout: Duration,
}

impl Gateway {
    /// Create a new gateway around `primary` and a shared-tier `backend`.
    ///
    /// `coordinator` holds the circuit state. It is shared with the
    /// gateway's [`HealthMonitor`] and may be shared with other callers
    /// that watch or drive the circuit.
    pub fn new(
        config: &Config,
        primary: Arc<dyn PrimaryStore>,
        backend: Arc<dyn CacheBackend>,
        coordinator: Arc<FallbackCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(GatewayMetrics::new());
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&primary),
            Arc::clone(&coordinator),
            Arc::clone(&metrics),
            &config.health,
        ));

        Self {
            primary,
            shared: SharedCache::new(backend, &config.cache, Arc::clone(&clock)),
            snapshots: SnapshotStore::new(config.snapshot.clone(), clock),
            coordinator,
            monitor,
            recent: RecentQueries::new(config.snapshot.recent_queries),
            metrics,
            query_timeout: config.primary.query_timeout(),
            write_timeout: config.primary.write_timeout(),
        }
    }

    pub fn coordinator(&self) -> &Arc<FallbackCoordinator> {
        &self.coordinator
    }

    /// Monitor probing this gateway's primary. Not running until spawned.
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn shared_cache(&self) -> &SharedCache {
        &self.shared
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Window of recently served queries replayed by [`Gateway::resync`].
    pub fn recent(&self) -> &RecentQueries {
        &self.recent
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Read one query result from the best available tier.
    ///
    /// # Panics
    ///
    /// Panics on an invalid collection name (see [`fingerprint`]).
    pub async fn read(&self, collection: &str, shape: &QueryShape) -> ReadOutcome {
        let fp = fingerprint(collection, shape);

        if !self.coordinator.state().uses_primary() {
            return self.read_degraded(collection, &fp, true).await;
        }

        if let Ok(Some(entry)) = self.shared.get(&fp).await {
            return self.served(entry.payload, ReadSource::Cache, false);
        }

        let result = self
            .bounded(self.query_timeout, self.primary.query(collection, shape))
            .await;
        match result {
            Ok(payload) => {
                self.populate(collection, &fp, shape, payload.clone()).await;
                self.served(payload, ReadSource::Primary, false)
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    collection = %collection,
                    fingerprint = %fp,
                    error = %e,
                    "primary read failed, serving from fallback tiers"
                );
                self.monitor.report_failure(e.to_string());
                // the shared tier already missed
                self.read_degraded(collection, &fp, false).await
            }
            Err(e) => {
                tracing::debug!(
                    collection = %collection,
                    error = %e,
                    "primary store rejected query"
                );
                ReadOutcome::Rejected(e.to_string())
            }
        }
    }

    async fn read_degraded(
        &self,
        collection: &str,
        fp: &Fingerprint,
        check_shared: bool,
    ) -> ReadOutcome {
        if check_shared {
            if let Ok(Some(entry)) = self.shared.get(fp).await {
                return self.served(entry.payload, ReadSource::Cache, true);
            }
        }

        if let Some(payload) = self.snapshots.read(collection, fp) {
            return self.served(payload, ReadSource::Memory, true);
        }

        let circuit_state = self.coordinator.state();
        self.metrics.reads_unavailable.inc();
        tracing::info!(
            collection = %collection,
            fingerprint = %fp,
            circuit = %circuit_state,
            "service degraded, no data available"
        );
        ReadOutcome::Unavailable { circuit_state }
    }

    fn served(&self, data: Bytes, source: ReadSource, degraded: bool) -> ReadOutcome {
        self.metrics.record_read(source);
        ReadOutcome::Served(ReadResponse {
            data,
            cached: source != ReadSource::Primary,
            degraded,
            source,
        })
    }

    async fn populate(
        &self,
        collection: &str,
        fp: &Fingerprint,
        shape: &QueryShape,
        payload: Bytes,
    ) {
        self.capture_if_normal(collection, fp, payload.clone());
        // soft failure already counted by the adapter
        let _ = self.shared.set(fp, payload, self.shared.default_ttl()).await;
        self.recent.record(collection, fp, shape);
    }

    /// Snapshots are only ever written from data read while NORMAL.
    fn capture_if_normal(&self, collection: &str, fp: &Fingerprint, payload: Bytes) -> bool {
        if self.coordinator.state() == CircuitState::Normal {
            self.snapshots.capture(collection, fp, payload);
            true
        } else {
            false
        }
    }

    /// Apply one write, or refuse it without touching the primary store.
    pub async fn write(&self, collection: &str, op: &WriteOperation) -> WriteOutcome {
        let state = self.coordinator.state();
        if !state.allows_writes() {
            let reason = match state {
                CircuitState::Recovering => RejectReason::Recovering,
                _ => RejectReason::Degraded,
            };
            tracing::info!(
                collection = %collection,
                action = op.action(),
                circuit = %state,
                "write rejected: read-only mode"
            );
            return self.reject(
                reason,
                state,
                format!("primary store unavailable, service is read-only ({})", state),
            );
        }

        let result = self
            .bounded(self.write_timeout, self.primary.write(collection, op))
            .await;
        match result {
            Ok(data) => {
                if let Err(fault) = self.shared.invalidate_collection(collection).await {
                    // entries already cached for this collection stay until their TTL
                    tracing::warn!(
                        collection = %collection,
                        error = %fault,
                        ttl_seconds = self.shared.default_ttl(),
                        "post-write shared cache invalidation failed"
                    );
                }
                self.metrics.writes_applied.inc();
                tracing::debug!(collection = %collection, action = op.action(), "write applied");
                WriteOutcome::Applied(data)
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    collection = %collection,
                    action = op.action(),
                    error = %e,
                    "primary write failed"
                );
                self.monitor.report_failure(e.to_string());
                let state = self.coordinator.state();
                self.reject(RejectReason::PrimaryUnavailable, state, e.to_string())
            }
            Err(e) => self.reject(RejectReason::StoreRejected, state, e.to_string()),
        }
    }

    fn reject(
        &self,
        reason: RejectReason,
        circuit_state: CircuitState,
        message: String,
    ) -> WriteOutcome {
        self.metrics.writes_rejected.inc();
        WriteOutcome::Rejected(WriteRejection {
            reason,
            circuit_state,
            message,
        })
    }

    async fn bounded<T>(
        &self,
        limit: Duration,
        call: impl Future<Output = Result<T, PrimaryError>>,
    ) -> Result<T, PrimaryError> {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(PrimaryError::Timeout(limit.as_millis() as u64)),
        }
    }

    /// Re-query every recently served fingerprint and refresh both cache
    /// tiers with the answers. Stops as soon as the circuit leaves NORMAL.
    pub async fn resync(&self) -> ResyncReport {
        let mut report = ResyncReport::default();

        for query in self.recent.snapshot() {
            if self.coordinator.state() != CircuitState::Normal {
                report.aborted = true;
                break;
            }
            report.attempted += 1;

            let result = self
                .bounded(self.query_timeout, self.primary.query(&query.collection, &query.shape))
                .await;
            match result {
                Ok(payload) => {
                    let captured = self.capture_if_normal(
                        &query.collection,
                        &query.fingerprint,
                        payload.clone(),
                    );
                    if !captured {
                        report.aborted = true;
                        break;
                    }
                    let _ = self
                        .shared
                        .set(&query.fingerprint, payload, self.shared.default_ttl())
                        .await;
                    report.refreshed += 1;
                    self.metrics.resync_refreshed.inc();
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::debug!(
                        fingerprint = %query.fingerprint,
                        error = %e,
                        "resync query failed"
                    );
                }
            }
        }

        tracing::info!(
            attempted = report.attempted,
            refreshed = report.refreshed,
            failed = report.failed,
            aborted = report.aborted,
            "snapshot resync finished"
        );
        report
    }

    /// Current circuit, tier sizes and shared-tier health. Read-only.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let status = self.coordinator.status();
        HealthSnapshot {
            is_primary_available: status.is_primary_available,
            circuit_state: status.state,
            failure_count: status.failure_count,
            consecutive_successes: status.consecutive_successes,
            last_check_at: status.last_check_at,
            last_sync_at: status.last_sync_at,
            memory_cache_sizes: self.snapshots.sizes(),
            shared_cache: self.shared.health(),
            fallback_active: !status.is_primary_available,
        }
    }

    /// Prometheus text exposition of the gateway counters and gauges.
    pub fn metrics_text(&self) -> String {
        self.metrics.to_prometheus(
            self.coordinator.state(),
            self.shared.failures(),
            &self.snapshots.sizes(),
        )
    }
}

/// Run a resync every time the circuit closes.
pub fn spawn_resync_task(gateway: Arc<Gateway>) -> JoinHandle<()> {
    // subscribe before spawning so no transition slips past
    let mut transitions = gateway.coordinator().subscribe();

    tokio::spawn(async move {
        loop {
            match transitions.recv().await {
                Ok(t) if t.to == CircuitState::Normal => {
                    gateway.resync().await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "resync task lagged behind circuit transitions");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use crate::common::{CacheTierError, HealthConfig, ManualClock};
    use crate::fallback::ProbeOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Scripted {
        up: AtomicBool,
        reject: AtomicBool,
        queries: AtomicUsize,
    }

    #[async_trait]
    impl PrimaryStore for Scripted {
        async fn query(&self, collection: &str, _: &QueryShape) -> Result<Bytes, PrimaryError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.reject.load(Ordering::SeqCst) {
                return Err(PrimaryError::Rejected("unknown field".into()));
            }
            if self.up.load(Ordering::SeqCst) {
                Ok(Bytes::from(format!("[\"{}\"]", collection)))
            } else {
                Err(PrimaryError::Unavailable("connection refused".into()))
            }
        }

        async fn write(&self, _: &str, _: &WriteOperation) -> Result<Bytes, PrimaryError> {
            Ok(Bytes::from_static(b"{}"))
        }

        async fn ping(&self) -> Result<(), PrimaryError> {
            Ok(())
        }
    }

    fn coordinator() -> Arc<FallbackCoordinator> {
        Arc::new(FallbackCoordinator::new(
            &HealthConfig::default(),
            Arc::new(ManualClock::default()),
        ))
    }

    fn gateway_with(
        coordinator: Arc<FallbackCoordinator>,
        backend: Arc<dyn CacheBackend>,
    ) -> (Gateway, Arc<Scripted>) {
        let primary = Arc::new(Scripted {
            up: AtomicBool::new(true),
            reject: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        });
        let gateway = Gateway::new(
            &Config::default(),
            primary.clone(),
            backend,
            coordinator,
            Arc::new(ManualClock::default()),
        );
        (gateway, primary)
    }

    fn gateway() -> (Gateway, Arc<Scripted>) {
        gateway_with(coordinator(), Arc::new(MemoryBackend::new()))
    }

    /// Memory backend whose generation counter cannot be bumped.
    struct NoIncr(MemoryBackend);

    #[async_trait]
    impl CacheBackend for NoIncr {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheTierError> {
            self.0.get(key).await
        }
        async fn set(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Duration,
        ) -> Result<(), CacheTierError> {
            self.0.set(key, value, ttl).await
        }
        async fn del(&self, key: &str) -> Result<(), CacheTierError> {
            self.0.del(key).await
        }
        async fn incr(&self, _: &str) -> Result<u64, CacheTierError> {
            Err(CacheTierError::Other("READONLY replica".into()))
        }
        fn name(&self) -> &'static str {
            "no-incr"
        }
    }

    #[tokio::test]
    async fn test_second_read_hits_shared_cache() {
        let (gw, primary) = gateway();
        let shape = QueryShape::new().filter("brand", "SuperGains");

        let first = gw.read("products", &shape).await.served().unwrap();
        assert_eq!(first.source, ReadSource::Primary);
        assert!(!first.cached);

        let second = gw.read("products", &shape).await.served().unwrap();
        assert_eq!(second.source, ReadSource::Cache);
        assert!(second.cached);
        assert!(!second.degraded);
        assert_eq!(second.data, first.data);

        assert_eq!(primary.queries.load(Ordering::SeqCst), 1);
        assert_eq!(gw.snapshots().size_of("products"), 1);
        assert_eq!(gw.recent().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_query_does_not_trip_breaker() {
        let (gw, primary) = gateway();
        primary.reject.store(true, Ordering::SeqCst);

        for _ in 0..5 {
            let outcome = gw.read("products", &QueryShape::new()).await;
            assert!(matches!(outcome, ReadOutcome::Rejected(_)));
        }
        assert_eq!(gw.coordinator().state(), CircuitState::Normal);
        assert_eq!(gw.snapshots().size_of("products"), 0);
    }

    #[tokio::test]
    async fn test_health_snapshot_is_side_effect_free() {
        let (gw, _) = gateway();
        let before = gw.health_snapshot();
        let again = gw.health_snapshot();
        assert_eq!(before, again);
        assert!(before.is_primary_available);
        assert!(!before.fallback_active);
        assert_eq!(before.circuit_state, CircuitState::Normal);
        assert!(before.memory_cache_sizes.is_empty());
        assert_eq!(before.shared_cache.backend, "memory");

        let json = serde_json::to_value(&before).unwrap();
        assert_eq!(json["circuitState"], "NORMAL");
        assert_eq!(json["isPrimaryAvailable"], true);
        assert!(json["memoryCacheSizes"].is_object());
    }

    #[tokio::test]
    async fn test_rejection_serializes_for_clients() {
        let (gw, _) = gateway();
        for _ in 0..3 {
            gw.monitor().report_failure("down");
        }

        let outcome = gw.write("orders", &WriteOperation::Delete { id: "o1".into() }).await;
        let rejection = outcome.rejection().unwrap();
        assert!(rejection.is_read_only());

        let json = serde_json::to_value(rejection).unwrap();
        assert_eq!(json["reason"], "degraded");
        assert_eq!(json["circuitState"], "DEGRADED");
    }

    #[tokio::test]
    async fn test_injected_coordinator_drives_gateway() {
        let shared = coordinator();
        let (gw, primary) = gateway_with(Arc::clone(&shared), Arc::new(MemoryBackend::new()));
        assert!(Arc::ptr_eq(gw.coordinator(), &shared));
        assert!(Arc::ptr_eq(gw.monitor().coordinator(), &shared));

        for _ in 0..3 {
            shared.record_probe(&ProbeOutcome::Failure("connection refused".into()));
        }
        assert_eq!(gw.health_snapshot().circuit_state, CircuitState::Degraded);

        let outcome = gw.read("products", &QueryShape::new()).await;
        assert!(outcome.is_unavailable());
        assert_eq!(primary.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_write_invalidates_many_cached_queries() {
        let (gw, primary) = gateway();
        for n in 0..300 {
            gw.read("products", &QueryShape::new().filter("n", n)).await;
        }
        let before = primary.queries.load(Ordering::SeqCst);

        let op = WriteOperation::Delete { id: "p1".into() };
        assert!(gw.write("products", &op).await.is_applied());

        for n in [0, 150, 299] {
            let r = gw.read("products", &QueryShape::new().filter("n", n)).await;
            assert_eq!(r.served().unwrap().source, ReadSource::Primary);
        }
        assert_eq!(primary.queries.load(Ordering::SeqCst), before + 3);
        assert_eq!(gw.shared_cache().failures(), 0);
    }

    #[tokio::test]
    async fn test_failed_invalidation_still_applies_write() {
        let backend = Arc::new(NoIncr(MemoryBackend::new()));
        let (gw, _) = gateway_with(coordinator(), backend);
        let shape = QueryShape::new();
        gw.read("products", &shape).await;

        let op = WriteOperation::Delete { id: "p1".into() };
        assert!(gw.write("products", &op).await.is_applied());
        assert_eq!(gw.shared_cache().failures(), 1);
        // the circuit only tracks the primary store
        assert_eq!(gw.coordinator().state(), CircuitState::Normal);
    }
}
