//! Configuration for storegate components
//!
//! Loaded from an optional TOML file, then overridden by `STOREGATE__*`
//! environment variables (e.g. `STOREGATE__HEALTH__FAILURE_THRESHOLD=5`).
//! Every field has a default, so an empty source yields a working config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::common::{Error, Result};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "STOREGATE";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub primary: PrimaryConfig,
    pub cache: CacheConfig,
    pub health: HealthConfig,
    pub snapshot: SnapshotConfig,

    /// Logging level (overridden by RUST_LOG)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            primary: PrimaryConfig::default(),
            cache: CacheConfig::default(),
            health: HealthConfig::default(),
            snapshot: SnapshotConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load config from an optional file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the state machine or the tiers misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.health.failure_threshold == 0 {
            return Err(Error::InvalidConfig(
                "health.failure_threshold must be at least 1".into(),
            ));
        }
        if self.health.recovery_threshold == 0 {
            return Err(Error::InvalidConfig(
                "health.recovery_threshold must be at least 1".into(),
            ));
        }
        if self.health.interval_ms == 0 {
            return Err(Error::InvalidConfig("health.interval_ms must be > 0".into()));
        }
        if self.health.probe_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "health.probe_timeout_ms must be > 0".into(),
            ));
        }
        if self.cache.timeout_ms == 0 {
            return Err(Error::InvalidConfig("cache.timeout_ms must be > 0".into()));
        }
        if self.cache.ttl_seconds == 0 {
            return Err(Error::InvalidConfig("cache.ttl_seconds must be > 0".into()));
        }
        if self.cache.namespace.is_empty() || self.cache.namespace.contains(':') {
            return Err(Error::InvalidConfig(
                "cache.namespace must be non-empty and must not contain ':'".into(),
            ));
        }
        if self.snapshot.default_capacity == 0
            || self.snapshot.capacities.values().any(|&c| c == 0)
        {
            return Err(Error::InvalidConfig(
                "snapshot capacities must be at least 1".into(),
            ));
        }
        if self.snapshot.max_collections == 0 {
            return Err(Error::InvalidConfig(
                "snapshot.max_collections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP boundary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,

    /// Maximum request body size for the data endpoints
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Primary document store collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryConfig {
    pub base_url: String,
    pub query_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7000".to_string(),
            query_timeout_ms: 2_000,
            write_timeout_ms: 5_000,
        }
    }
}

impl PrimaryConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    Memory,
}

/// Shared cache tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub redis_url: String,
    pub pool_size: usize,

    /// Key namespace, first segment of every shared-tier key
    pub namespace: String,

    /// TTL applied on write-through
    pub ttl_seconds: u64,

    /// Hard timeout for every shared-tier call
    pub timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            namespace: "storegate".to_string(),
            ttl_seconds: 300,
            timeout_ms: 150,
        }
    }
}

impl CacheConfig {
    /// Per-call budget, never shorter than 1 ms.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// Health monitor and circuit thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_ms: u64,
    pub probe_timeout_ms: u64,

    /// Consecutive failed probes before NORMAL -> DEGRADED
    pub failure_threshold: u32,

    /// Consecutive successful probes before RECOVERING -> NORMAL
    pub recovery_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            probe_timeout_ms: 1_000,
            failure_threshold: 3,
            recovery_threshold: 3,
        }
    }
}

impl HealthConfig {
    /// Probe period, never shorter than 1 ms (a zero period cannot be ticked).
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    /// Bound on a single probe, never shorter than 1 ms.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }
}

/// Memory snapshot store sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Capacity for collections without an explicit entry
    pub default_capacity: usize,

    /// Per-collection capacities
    pub capacities: HashMap<String, usize>,

    /// How many recently served queries are remembered for resync
    pub recent_queries: usize,

    /// Upper bound on distinct collections holding snapshots. Collections
    /// listed in `capacities` are always admitted.
    pub max_collections: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        let capacities = [("products", 1000), ("categories", 200), ("orders", 500), ("users", 500)]
            .into_iter()
            .map(|(name, cap)| (name.to_string(), cap))
            .collect();
        Self {
            default_capacity: 500,
            capacities,
            recent_queries: 256,
            max_collections: 64,
        }
    }
}

impl SnapshotConfig {
    /// Whether `collection` has its own capacity entry
    pub fn is_configured(&self, collection: &str) -> bool {
        self.capacities.contains_key(collection)
    }

    /// Bucket capacity for `collection`, falling back to `default_capacity`.
    pub fn capacity_for(&self, collection: &str) -> usize {
        self.capacities
            .get(collection)
            .copied()
            .unwrap_or(self.default_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.health.recovery_threshold, 3);
        assert_eq!(config.snapshot.capacity_for("products"), 1000);
        assert_eq!(config.snapshot.capacity_for("reviews"), 500);
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let mut config = Config::default();
        config.health.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.health.recovery_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.snapshot.capacities.insert("orders".into(), 0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.namespace = "a:b".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = Config::default();
        config.health.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.health.probe_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.snapshot.max_collections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_health_durations_never_zero() {
        let health = HealthConfig {
            interval_ms: 0,
            probe_timeout_ms: 0,
            ..HealthConfig::default()
        };
        assert_eq!(health.interval(), Duration::from_millis(1));
        assert_eq!(health.probe_timeout(), Duration::from_millis(1));

        let cache = CacheConfig {
            timeout_ms: 0,
            ..CacheConfig::default()
        };
        assert_eq!(cache.timeout(), Duration::from_millis(1));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[cache]
backend = "memory"
ttl_seconds = 60

[health]
failure_threshold = 5
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
        assert_eq!(config.cache.ttl_seconds, 60);
        assert_eq!(config.health.failure_threshold, 5);
        // untouched sections keep their defaults
        assert_eq!(config.health.recovery_threshold, 3);
        assert_eq!(config.cache.namespace, "storegate");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = Config::load(Some(Path::new("/nonexistent/storegate.toml")));
        assert!(result.is_err());
    }
}
