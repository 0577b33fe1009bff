//! Health monitor
//!
//! Timer-driven liveness probe of the primary store. Each tick issues one
//! `ping` under the probe timeout and hands the result to the coordinator.
//! A timeout, an error and a panicking probe are all the same failed probe;
//! the loop itself never exits on a probe result.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::common::{GatewayMetrics, HealthConfig};
use crate::fallback::{FallbackCoordinator, ProbeOutcome, Transition};
use crate::gateway::PrimaryStore;

/// Periodic liveness check of the primary store.
pub struct HealthMonitor {
    primary: Arc<dyn PrimaryStore>,
    coordinator: Arc<FallbackCoordinator>,
    metrics: Arc<GatewayMetrics>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    /// Create a new monitor that feeds `coordinator`. Nothing runs until
    /// [`HealthMonitor::spawn`].
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        coordinator: Arc<FallbackCoordinator>,
        metrics: Arc<GatewayMetrics>,
        config: &HealthConfig,
    ) -> Self {
        Self {
            primary,
            coordinator,
            metrics,
            interval: config.interval(),
            probe_timeout: config.probe_timeout(),
        }
    }

    pub fn coordinator(&self) -> &Arc<FallbackCoordinator> {
        &self.coordinator
    }

    /// Run one probe now and feed the result to the coordinator.
    pub async fn probe_once(&self) -> (ProbeOutcome, Option<Transition>) {
        let started = Instant::now();
        let outcome = self.ping().await;
        self.metrics.record_probe(started.elapsed(), outcome.is_success());

        if let ProbeOutcome::Failure(reason) = &outcome {
            tracing::debug!(reason = %reason, "primary store probe failed");
        }

        let transition = self.coordinator.record_probe(&outcome);
        (outcome, transition)
    }

    async fn ping(&self) -> ProbeOutcome {
        let primary = Arc::clone(&self.primary);
        let mut handle = tokio::spawn(async move { primary.ping().await });

        match tokio::time::timeout(self.probe_timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => ProbeOutcome::Success,
            Ok(Ok(Err(e))) => ProbeOutcome::Failure(e.to_string()),
            Ok(Err(join_error)) => {
                ProbeOutcome::Failure(format!("probe task failed: {}", join_error))
            }
            Err(_) => {
                handle.abort();
                ProbeOutcome::Failure(format!(
                    "probe timed out after {} ms",
                    self.probe_timeout.as_millis()
                ))
            }
        }
    }

    /// A request saw a transient primary failure. Counts as a missed probe.
    pub fn report_failure(&self, reason: impl Into<String>) -> Option<Transition> {
        self.metrics.primary_failures.inc();
        self.coordinator.record_probe(&ProbeOutcome::Failure(reason.into()))
    }

    /// Start the probe loop on its own task. The first probe fires after one
    /// full interval.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_ms = %self.interval.as_millis(),
                timeout_ms = %self.probe_timeout.as_millis(),
                "health monitor started"
            );

            loop {
                ticker.tick().await;
                self.probe_once().await;
            }
        })
    }
}
