//! Fallback coordinator (circuit state machine)
//!
//! ```text
//!            failures >= failure_threshold
//!   NORMAL ─────────────────────────────────▶ DEGRADED
//!     ▲                                        │    ▲
//!     │ successes >= recovery_threshold        │    │ any failure
//!     │                      first success     ▼    │
//!     └──────────────────────────────────── RECOVERING
//! ```
//!
//! All mutable circuit data lives behind one mutex. Readers get copies and
//! never hold the lock across an await. Every state change is logged and
//! published on a broadcast channel; entering NORMAL is what triggers the
//! snapshot resync.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::common::{Clock, HealthConfig};
use crate::fallback::CircuitState;

/// Capacity of the transition feed. Transitions are rare; a lagging
/// subscriber only loses old ones.
const TRANSITION_CHANNEL_CAPACITY: usize = 32;

/// Result of one health observation, from the timer or from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }
}

/// Copy of the coordinator's state at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub is_primary_available: bool,
    pub failure_count: u32,
    pub consecutive_successes: u32,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_transition_at: Option<DateTime<Utc>>,
}

impl Default for CircuitStatus {
    fn default() -> Self {
        Self {
            state: CircuitState::Normal,
            is_primary_available: true,
            failure_count: 0,
            consecutive_successes: 0,
            last_check_at: None,
            last_sync_at: None,
            last_transition_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
    pub failure_count: u32,
}

/// Owner of the circuit state. Shared by the gateway, the health monitor
/// and anything else that watches the circuit.
pub struct FallbackCoordinator {
    status: Mutex<CircuitStatus>,
    failure_threshold: u32,
    recovery_threshold: u32,
    clock: Arc<dyn Clock>,
    transitions: broadcast::Sender<Transition>,
}

impl FallbackCoordinator {
    /// Create a new coordinator in NORMAL with the thresholds from `config`.
    pub fn new(config: &HealthConfig, clock: Arc<dyn Clock>) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            status: Mutex::new(CircuitStatus::default()),
            failure_threshold: config.failure_threshold.max(1),
            recovery_threshold: config.recovery_threshold.max(1),
            clock,
            transitions,
        }
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Copy of every counter and timestamp, taken under one lock.
    pub fn status(&self) -> CircuitStatus {
        self.lock().clone()
    }

    pub fn allows_writes(&self) -> bool {
        self.state().allows_writes()
    }

    /// Feed of state changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one observation and run the state machine on it.
    ///
    /// Counter updates and the transition decision happen under the same
    /// lock, so concurrent observations cannot interleave between them.
    pub fn record_probe(&self, outcome: &ProbeOutcome) -> Option<Transition> {
        let now = self.clock.now();
        let transition = {
            let mut status = self.lock();
            status.last_check_at = Some(now);
            let from = status.state;

            match outcome {
                ProbeOutcome::Success => self.on_success(&mut status, now),
                ProbeOutcome::Failure(_) => self.on_failure(&mut status),
            }

            if status.state == from {
                None
            } else {
                status.last_transition_at = Some(now);
                Some(Transition {
                    from,
                    to: status.state,
                    at: now,
                    failure_count: status.failure_count,
                })
            }
        };

        if let Some(t) = &transition {
            self.announce(t, outcome);
        }
        transition
    }

    fn on_success(&self, status: &mut CircuitStatus, now: DateTime<Utc>) {
        status.failure_count = 0;

        match status.state {
            CircuitState::Normal => {}
            CircuitState::Degraded => {
                status.state = CircuitState::Recovering;
                status.consecutive_successes = 1;
            }
            CircuitState::Recovering => {
                status.consecutive_successes = status.consecutive_successes.saturating_add(1);
            }
        }

        if status.state == CircuitState::Recovering
            && status.consecutive_successes >= self.recovery_threshold
        {
            status.state = CircuitState::Normal;
            status.is_primary_available = true;
            status.last_sync_at = Some(now);
            status.failure_count = 0;
            status.consecutive_successes = 0;
        }
    }

    fn on_failure(&self, status: &mut CircuitStatus) {
        status.failure_count = status.failure_count.saturating_add(1);

        match status.state {
            CircuitState::Normal if status.failure_count >= self.failure_threshold => {
                status.state = CircuitState::Degraded;
                status.is_primary_available = false;
            }
            CircuitState::Recovering => {
                status.state = CircuitState::Degraded;
                status.consecutive_successes = 0;
            }
            _ => {}
        }
    }

    fn announce(&self, t: &Transition, outcome: &ProbeOutcome) {
        match (t.from, t.to) {
            (_, CircuitState::Degraded) => {
                let reason = match outcome {
                    ProbeOutcome::Failure(reason) => reason.as_str(),
                    ProbeOutcome::Success => "",
                };
                tracing::error!(
                    target: "storegate::alert",
                    from = %t.from,
                    failures = t.failure_count,
                    reason = %reason,
                    "primary store unavailable: entering DEGRADED, writes rejected"
                );
            }
            (_, CircuitState::Recovering) => {
                tracing::warn!(from = %t.from, "primary store answering again: RECOVERING");
            }
            (_, CircuitState::Normal) => {
                tracing::info!(from = %t.from, "primary store stable: back to NORMAL");
            }
        }

        // no subscribers is fine
        let _ = self.transitions.send(t.clone());
    }
}
