//! Shared cache tier
//!
//! [`SharedCache`] wraps a network key/value backend (Redis in production,
//! an in-process map for single-instance runs and tests) and guarantees:
//! - every call finishes within the configured timeout
//! - a failed or timed-out call surfaces as a [`CacheFault`], never as a
//!   crate error, and callers treat it as a miss / no-op
//! - failures bump a tier-local counter that is reported in the health
//!   snapshot and is never fed to the primary-store circuit
//!
//! Entry keys are `{namespace}:{collection}:g{generation}:{digest}`. Each
//! collection has a generation counter at `{namespace}:{collection}:gen`.
//! Invalidating a collection increments that counter, which moves every
//! lookup to a fresh key prefix; entries under older generations are never
//! read again and expire by TTL. Invalidation is one INCR regardless of how
//! many keys the collection or the keyspace holds.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::common::{CacheConfig, CacheTierError, Clock, Error, Fingerprint, Result};

/// What the shared tier stores for one fingerprint. Written whole, never
/// patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub payload: Bytes,
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

/// Soft failure of the shared tier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheFault {
    #[error("shared cache timed out after {0} ms")]
    Timeout(u64),

    #[error("shared cache backend failed: {0}")]
    Backend(String),
}

/// Result of a shared-tier call. `Err` means "treat as miss / no-op".
pub type SoftResult<T> = std::result::Result<T, CacheFault>;

/// Raw key/value protocol spoken by a shared cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, CacheTierError>;

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> std::result::Result<(), CacheTierError>;

    async fn del(&self, key: &str) -> std::result::Result<(), CacheTierError>;

    /// Atomically increment the integer at `key` (missing counts as 0) and
    /// return the new value. The key never expires. `get` on the same key
    /// returns the value as ASCII digits.
    async fn incr(&self, key: &str) -> std::result::Result<u64, CacheTierError>;

    fn name(&self) -> &'static str;
}

/// Redis backend over a deadpool connection pool.
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// Create a new pooled Redis backend. Connections are opened lazily.
    pub fn connect(config: &CacheConfig) -> Result<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(&config.redis_url);
        let timeout = Some(config.timeout());
        let pool_config = redis_config.pool.get_or_insert_with(Default::default);
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = timeout;
        pool_config.timeouts.create = timeout;
        pool_config.timeouts.recycle = timeout;

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| Error::CacheBackend(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, CacheTierError> {
        let mut conn = self.pool.get().await?;
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> std::result::Result<(), CacheTierError> {
        let mut conn = self.pool.get().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> std::result::Result<(), CacheTierError> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> std::result::Result<u64, CacheTierError> {
        let mut conn = self.pool.get().await?;
        Ok(conn.incr::<_, _, u64>(key, 1).await?)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// In-process backend with per-key expiry.
#[derive(Default)]
pub struct MemoryBackend {
    map: DashMap<String, (Vec<u8>, Instant, Duration)>,
}

impl MemoryBackend {
    /// Create a new, empty in-process backend.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, CacheTierError> {
        let expired = match self.map.get(key) {
            Some(entry) => {
                let (value, stored, ttl) = entry.value();
                if stored.elapsed() < *ttl {
                    return Ok(Some(value.clone()));
                }
                true
            }
            None => false,
        };
        if expired {
            self.map.remove(key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> std::result::Result<(), CacheTierError> {
        self.map.insert(key.to_string(), (value, Instant::now(), ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> std::result::Result<(), CacheTierError> {
        self.map.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> std::result::Result<u64, CacheTierError> {
        let mut slot = self
            .map
            .entry(key.to_string())
            .or_insert_with(|| (b"0".to_vec(), Instant::now(), Duration::MAX));
        let next = parse_counter(&slot.0)? + 1;
        *slot = (next.to_string().into_bytes(), Instant::now(), Duration::MAX);
        Ok(next)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn parse_counter(raw: &[u8]) -> std::result::Result<u64, CacheTierError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CacheTierError::Other("generation counter is not an integer".into()))
}

/// Shared-tier health, reported next to (not inside) the circuit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedCacheHealth {
    pub backend: &'static str,
    pub failures: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Timeout-guarded adapter in front of a [`CacheBackend`].
pub struct SharedCache {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
    ttl_seconds: u64,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    failures: AtomicU64,
    last_failure_at: Mutex<Option<DateTime<Utc>>>,
}

impl SharedCache {
    /// Create a new adapter over `backend` using the namespace, TTL and
    /// timeout from `config`.
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        config: &CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            namespace: config.namespace.clone(),
            ttl_seconds: config.ttl_seconds,
            timeout: config.timeout(),
            clock,
            failures: AtomicU64::new(0),
            last_failure_at: Mutex::new(None),
        }
    }

    /// TTL used for write-through
    pub fn default_ttl(&self) -> u64 {
        self.ttl_seconds
    }

    fn generation_key(&self, collection: &str) -> String {
        format!("{}:{}:gen", self.namespace, collection)
    }

    fn entry_key(&self, fingerprint: &Fingerprint, generation: u64) -> String {
        format!(
            "{}:{}:g{}:{}",
            self.namespace,
            fingerprint.collection(),
            generation,
            fingerprint.digest()
        )
    }

    /// Resolve the current key of `fingerprint`. Runs inside the caller's
    /// guarded call.
    async fn current_key(
        &self,
        fingerprint: &Fingerprint,
    ) -> std::result::Result<String, CacheTierError> {
        let generation = match self
            .backend
            .get(&self.generation_key(fingerprint.collection()))
            .await?
        {
            Some(raw) => parse_counter(&raw)?,
            None => 0,
        };
        Ok(self.entry_key(fingerprint, generation))
    }

    /// Look up the entry for `fingerprint`. A fault is a miss to the caller.
    pub async fn get(&self, fingerprint: &Fingerprint) -> SoftResult<Option<CacheEntry>> {
        let lookup = async {
            let key = self.current_key(fingerprint).await?;
            self.backend.get(&key).await
        };
        let raw = self.guarded("get", fingerprint.as_str(), lookup).await?;

        match raw {
            None => Ok(None),
            Some(bytes) => match bincode::deserialize::<CacheEntry>(&bytes) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => Err(self.fail("get", fingerprint.as_str(), CacheTierError::Codec(e))),
            },
        }
    }

    /// Write-through `payload` for `fingerprint` with the given TTL.
    ///
    /// A set racing a collection invalidation lands under the old
    /// generation and is never served.
    pub async fn set(
        &self,
        fingerprint: &Fingerprint,
        payload: Bytes,
        ttl_seconds: u64,
    ) -> SoftResult<()> {
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            payload,
            stored_at: self.clock.now(),
            ttl_seconds,
        };
        let encoded = bincode::serialize(&entry)
            .map_err(|e| self.fail("set", fingerprint.as_str(), e.into()))?;

        let store = async {
            let key = self.current_key(fingerprint).await?;
            self.backend
                .set(&key, encoded, Duration::from_secs(ttl_seconds))
                .await
        };
        self.guarded("set", fingerprint.as_str(), store).await
    }

    /// Drop the entry for a single fingerprint.
    pub async fn invalidate(&self, fingerprint: &Fingerprint) -> SoftResult<()> {
        let remove = async {
            let key = self.current_key(fingerprint).await?;
            self.backend.del(&key).await
        };
        self.guarded("del", fingerprint.as_str(), remove).await
    }

    /// Drop every cached query of `collection` by moving it to a new
    /// generation. Returns the new generation.
    pub async fn invalidate_collection(&self, collection: &str) -> SoftResult<u64> {
        let key = self.generation_key(collection);
        let generation = self.guarded("incr", &key, self.backend.incr(&key)).await?;
        tracing::debug!(collection = %collection, generation, "shared cache invalidated");
        Ok(generation)
    }

    /// Failed or timed-out calls since startup
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Backend name plus failure count and time of the last failure.
    pub fn health(&self) -> SharedCacheHealth {
        SharedCacheHealth {
            backend: self.backend.name(),
            failures: self.failures(),
            last_failure_at: *self
                .last_failure_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    async fn guarded<T>(
        &self,
        op: &'static str,
        key: &str,
        call: impl Future<Output = std::result::Result<T, CacheTierError>>,
    ) -> SoftResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.fail(op, key, e)),
            Err(_) => {
                self.record_failure();
                tracing::debug!(
                    op,
                    key = %key,
                    timeout_ms = %self.timeout.as_millis(),
                    "shared cache call timed out"
                );
                Err(CacheFault::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }

    fn fail(&self, op: &'static str, key: &str, error: CacheTierError) -> CacheFault {
        self.record_failure();
        tracing::debug!(op, key = %key, error = %error, "shared cache call failed");
        CacheFault::Backend(error.to_string())
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self
            .last_failure_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(self.clock.now());
    }
}
