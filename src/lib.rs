//! # storegate
//!
//! Tiered caching and failure-fallback data access layer for a document
//! store:
//! - Shared cache tier (Redis) in front of the primary store
//! - Bounded in-process snapshots as the last-resort read source
//! - Circuit breaker with hysteresis: NORMAL, DEGRADED, RECOVERING
//! - Read-only mode while the primary is down, reads keep flowing
//! - Snapshot resync once the primary is trusted again
//!
//! ## Architecture
//!
//! ```text
//!            route handlers / HTTP boundary
//!                         │
//!               ┌─────────▼──────────┐
//!               │      Gateway       │◀── state ── FallbackCoordinator
//!               └──┬──────┬──────┬───┘                  ▲
//!                  │      │      │                      │ probes
//!   ┌──────────────▼┐  ┌──▼────┐ ┌▼───────────────┐  ┌───┴──────────┐
//!   │ SharedCache   │  │Primary│ │ SnapshotStore  │  │HealthMonitor │
//!   │ (Redis, TTL)  │  │ store │ │ (per-collection│  │  (timer)     │
//!   └───────────────┘  └───────┘ │  bounded)      │  └──────────────┘
//!                                └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! storegate serve \
//!   --config ./storegate.toml \
//!   --bind 0.0.0.0:8080 \
//!   --primary http://docstore:7000 \
//!   --redis redis://cache:6379
//! ```

pub mod cache;
pub mod common;
pub mod fallback;
pub mod gateway;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use fallback::CircuitState;
pub use gateway::{Gateway, GatewayServer};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
