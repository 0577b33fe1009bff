//! Cache tiers
//!
//! - [`shared`]: network key/value tier, first choice for reads
//! - [`snapshot`]: process-local last resort while the primary is down

pub mod shared;
pub mod snapshot;

pub use shared::{
    CacheBackend, CacheEntry, CacheFault, MemoryBackend, RedisBackend, SharedCache,
    SharedCacheHealth, SoftResult,
};
pub use snapshot::{SnapshotEntry, SnapshotSizes, SnapshotStore};
