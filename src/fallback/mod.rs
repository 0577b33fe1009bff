//! Failure fallback: circuit state machine and primary-store health monitor
//!
//! - [`FallbackCoordinator`] owns the circuit state and is the only thing
//!   that changes it
//! - [`HealthMonitor`] probes the primary store on a timer and feeds the
//!   coordinator; request-path failures are fed through it too

pub mod coordinator;
pub mod monitor;

pub use coordinator::{CircuitStatus, FallbackCoordinator, ProbeOutcome, Transition};
pub use monitor::HealthMonitor;

use serde::{Deserialize, Serialize};

/// Operating mode of the data access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Primary store reachable, reads and writes go through
    Normal,
    /// Primary store considered down, reads from cache tiers only
    Degraded,
    /// Probation after the primary came back, still read-only
    Recovering,
}

impl CircuitState {
    /// Writes are allowed in NORMAL and nowhere else.
    pub fn allows_writes(&self) -> bool {
        matches!(self, CircuitState::Normal)
    }

    /// Should reads consult the primary store?
    pub fn uses_primary(&self) -> bool {
        matches!(self, CircuitState::Normal)
    }

    pub fn as_gauge(&self) -> u8 {
        match self {
            CircuitState::Normal => 0,
            CircuitState::Degraded => 1,
            CircuitState::Recovering => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Normal => write!(f, "NORMAL"),
            CircuitState::Degraded => write!(f, "DEGRADED"),
            CircuitState::Recovering => write!(f, "RECOVERING"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state() {
        assert!(CircuitState::Normal.allows_writes());
        assert!(!CircuitState::Degraded.allows_writes());
        assert!(!CircuitState::Recovering.allows_writes());

        assert!(CircuitState::Normal.uses_primary());
        assert!(!CircuitState::Recovering.uses_primary());

        assert_eq!(CircuitState::Recovering.to_string(), "RECOVERING");
        assert_eq!(
            serde_json::to_string(&CircuitState::Degraded).unwrap(),
            "\"DEGRADED\""
        );
    }
}
