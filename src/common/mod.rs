//! Common utilities and types shared across storegate

pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CacheBackendKind, CacheConfig, Config, HealthConfig, PrimaryConfig, ServerConfig,
    SnapshotConfig,
};
pub use error::{CacheTierError, Error, PrimaryError, Result};
pub use fingerprint::{fingerprint, Fingerprint, Page, QueryShape, SortDirection, SortKey};
pub use metrics::GatewayMetrics;
pub use utils::{is_valid_collection, parse_duration, validate_collection};
