//! Gateway metrics
//!
//! Lock-free counters plus a latency histogram for primary
//! store probes, rendered in Prometheus text format at `/metrics`.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::cache::snapshot::SnapshotSizes;
use crate::fallback::CircuitState;
use crate::gateway::ReadSource;

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    /// Create a new histogram with custom bucket boundaries (milliseconds).
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in milliseconds
    pub fn observe(&self, value_ms: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value_ms <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value_ms * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duration.
    pub fn observe_duration(&self, d: Duration) {
        self.observe(d.as_secs_f64() * 1000.0);
    }

    /// Cumulative buckets, last one is +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters for everything the gateway decides.
#[derive(Debug)]
pub struct GatewayMetrics {
    pub reads_primary: Counter,
    pub reads_cache: Counter,
    pub reads_memory: Counter,
    pub reads_unavailable: Counter,
    pub writes_applied: Counter,
    pub writes_rejected: Counter,
    pub primary_failures: Counter,
    pub probes_total: Counter,
    pub probes_failed: Counter,
    pub probe_latency: Histogram,
    pub resync_refreshed: Counter,
    start_time: Instant,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            reads_primary: Counter::new(),
            reads_cache: Counter::new(),
            reads_memory: Counter::new(),
            reads_unavailable: Counter::new(),
            writes_applied: Counter::new(),
            writes_rejected: Counter::new(),
            primary_failures: Counter::new(),
            probes_total: Counter::new(),
            probes_failed: Counter::new(),
            probe_latency: Histogram::new(),
            resync_refreshed: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Count a served read by the tier that answered it.
    pub fn record_read(&self, source: ReadSource) {
        match source {
            ReadSource::Primary => self.reads_primary.inc(),
            ReadSource::Cache => self.reads_cache.inc(),
            ReadSource::Memory => self.reads_memory.inc(),
        }
    }

    /// Count one health probe and its latency.
    pub fn record_probe(&self, elapsed: Duration, success: bool) {
        self.probes_total.inc();
        self.probe_latency.observe_duration(elapsed);
        if !success {
            self.probes_failed.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render Prometheus text, including live state passed in by the caller.
    pub fn to_prometheus(
        &self,
        state: CircuitState,
        shared_cache_failures: u64,
        snapshot_sizes: &SnapshotSizes,
    ) -> String {
        let mut out = String::new();

        counter(&mut out, "storegate_reads_total", "Reads served, by source", &[
            ("source=\"primary\"", self.reads_primary.get()),
            ("source=\"cache\"", self.reads_cache.get()),
            ("source=\"memory\"", self.reads_memory.get()),
        ]);
        counter(
            &mut out,
            "storegate_reads_unavailable_total",
            "Reads no tier could answer",
            &[("", self.reads_unavailable.get())],
        );
        counter(&mut out, "storegate_writes_total", "Writes, by outcome", &[
            ("outcome=\"applied\"", self.writes_applied.get()),
            ("outcome=\"rejected\"", self.writes_rejected.get()),
        ]);
        counter(
            &mut out,
            "storegate_primary_failures_total",
            "Transient primary store failures seen by requests",
            &[("", self.primary_failures.get())],
        );
        counter(
            &mut out,
            "storegate_shared_cache_failures_total",
            "Shared cache tier soft failures",
            &[("", shared_cache_failures)],
        );
        counter(&mut out, "storegate_probes_total", "Health probes, by result", &[
            ("result=\"ok\"", self.probes_total.get().saturating_sub(self.probes_failed.get())),
            ("result=\"failed\"", self.probes_failed.get()),
        ]);
        counter(
            &mut out,
            "storegate_resync_refreshed_total",
            "Snapshot entries refreshed by post-recovery resync",
            &[("", self.resync_refreshed.get())],
        );

        out.push_str("# HELP storegate_circuit_state 0=normal, 1=degraded, 2=recovering\n");
        out.push_str("# TYPE storegate_circuit_state gauge\n");
        let _ = writeln!(out, "storegate_circuit_state {}", state.as_gauge());

        out.push_str("# HELP storegate_snapshot_entries Memory snapshot entries per collection\n");
        out.push_str("# TYPE storegate_snapshot_entries gauge\n");
        for (collection, size) in snapshot_sizes {
            let _ = writeln!(
                out,
                "storegate_snapshot_entries{{collection=\"{}\"}} {}",
                collection, size
            );
        }

        out.push_str("# HELP storegate_probe_duration_ms Primary store probe duration (ms)\n");
        out.push_str("# TYPE storegate_probe_duration_ms histogram\n");
        for (le, count) in self.probe_latency.get_buckets() {
            if le.is_infinite() {
                let _ = writeln!(
                    out,
                    "storegate_probe_duration_ms_bucket{{le=\"+Inf\"}} {}",
                    count
                );
            } else {
                let _ = writeln!(
                    out,
                    "storegate_probe_duration_ms_bucket{{le=\"{}\"}} {}",
                    le, count
                );
            }
        }
        let _ = writeln!(out, "storegate_probe_duration_ms_sum {}", self.probe_latency.sum());
        let _ = writeln!(out, "storegate_probe_duration_ms_count {}", self.probe_latency.count());

        out.push_str("# HELP storegate_uptime_seconds Process uptime in seconds\n");
        out.push_str("# TYPE storegate_uptime_seconds gauge\n");
        let _ = writeln!(out, "storegate_uptime_seconds {}", self.uptime_seconds());

        out
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(out: &mut String, name: &str, help: &str, series: &[(&str, u64)]) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    for (labels, value) in series {
        if labels.is_empty() {
            let _ = writeln!(out, "{} {}", name, value);
        } else {
            let _ = writeln!(out, "{}{{{}}} {}", name, labels, value);
        }
    }
}
