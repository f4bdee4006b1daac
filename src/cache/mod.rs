//! Cache layer
//!
//! This module provides the ephemeral cache used in front of the durable store.
//! It supports:
//! - In-memory cache (moka) - default, for single-instance deployment
//! - Redis cache - optional, for multi-instance deployment
//!
//! Besides plain JSON values with a TTL, the cache exposes counter primitives
//! used by capacity admission. `reserve_counter` is a single atomic
//! compare-and-increment: on Redis it runs as a server-side Lua script, in
//! memory it runs under one lock. Neither backend is authoritative; the
//! durable store is.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rollcall::cache::{create_cache, CacheLayer};
//! use rollcall::config::CacheConfig;
//!
//! let cache = create_cache(&CacheConfig::default()).await?;
//! cache.set("key", &"value", Duration::from_secs(60)).await?;
//! ```

pub mod memory;
#[cfg(feature = "redis-cache")]
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, CacheDriver};

/// Arguments for an atomic compare-and-increment on a capacity counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterReservation {
    /// Value to initialise the counter with when the key is absent
    pub seed: i64,
    /// Upper bound; 0 means unlimited
    pub capacity: i64,
    /// When false the counter always increments
    pub enforced: bool,
    /// TTL applied when the counter is (re)initialised
    pub ttl: Duration,
}

/// Result of a compare-and-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOutcome {
    pub admitted: bool,
    /// Counter value after the operation
    pub count: i64,
}

/// One page of an incremental key scan
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Cursor for the next call; 0 once the iteration is complete
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Cache layer trait
///
/// This trait defines the interface for cache implementations.
/// Note: Due to Rust's object safety rules, this trait cannot be used
/// as a trait object (`dyn CacheLayer`). Use the `Cache` enum instead
/// for runtime polymorphism.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Get a value from cache
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    /// Set a value in cache with TTL
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>;

    /// Delete a value from cache
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically seed-if-absent, compare against capacity and increment
    async fn reserve_counter(&self, key: &str, request: CounterReservation) -> Result<CounterOutcome>;

    /// Decrement a counter, never below zero
    ///
    /// Returns `None` when the counter is not cached.
    async fn release_counter(&self, key: &str) -> Result<Option<i64>>;

    /// Overwrite a counter value
    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<()>;

    /// Read several counters in one round trip
    async fn get_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>>;

    /// Incrementally list keys matching a glob pattern
    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<ScanPage>;
}

pub use memory::MemoryCache;
#[cfg(feature = "redis-cache")]
pub use redis::RedisCache;

/// Unified cache enum for runtime polymorphism
///
/// Since `CacheLayer` trait has generic methods, it cannot be used as a trait object.
/// This enum provides runtime polymorphism by wrapping concrete cache implementations.
#[derive(Debug)]
pub enum Cache {
    /// In-memory cache using moka
    Memory(MemoryCache),
    /// Redis cache for distributed deployment
    #[cfg(feature = "redis-cache")]
    Redis(RedisCache),
}

#[async_trait]
impl CacheLayer for Cache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self {
            Cache::Memory(cache) => cache.get(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.get(key).await,
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set(key, value, ttl).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.delete(key).await,
        }
    }

    async fn reserve_counter(&self, key: &str, request: CounterReservation) -> Result<CounterOutcome> {
        match self {
            Cache::Memory(cache) => cache.reserve_counter(key, request).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.reserve_counter(key, request).await,
        }
    }

    async fn release_counter(&self, key: &str) -> Result<Option<i64>> {
        match self {
            Cache::Memory(cache) => cache.release_counter(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.release_counter(key).await,
        }
    }

    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set_counter(key, value, ttl).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.set_counter(key, value, ttl).await,
        }
    }

    async fn get_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>> {
        match self {
            Cache::Memory(cache) => cache.get_counters(keys).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.get_counters(keys).await,
        }
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<ScanPage> {
        match self {
            Cache::Memory(cache) => cache.scan(pattern, cursor, count).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.scan(pattern, cursor, count).await,
        }
    }
}

/// Create a cache instance based on configuration
///
/// - `CacheDriver::Memory` - Creates an in-memory cache using moka
/// - `CacheDriver::Redis` - Creates a Redis cache (requires `redis-cache` feature)
///
/// # Errors
/// - Returns an error if Redis is configured but the `redis-cache` feature is not enabled
/// - Returns an error if the Redis URL is missing or malformed
///
/// An unreachable Redis server is not an error: the cache starts degraded and
/// reconnects on use.
pub async fn create_cache(config: &CacheConfig) -> Result<Arc<Cache>> {
    match config.driver {
        CacheDriver::Memory => {
            let cache = MemoryCache::with_capacity_and_ttl(10_000, config.entity_ttl());
            Ok(Arc::new(Cache::Memory(cache)))
        }
        CacheDriver::Redis => {
            #[cfg(feature = "redis-cache")]
            {
                let redis_url = config.redis_url.as_ref()
                    .ok_or_else(|| anyhow::anyhow!(
                        "Redis URL is required when using Redis cache driver. \
                         Set 'redis_url' in cache configuration or use ROLLCALL_CACHE_REDIS_URL environment variable."
                    ))?;

                let cache = RedisCache::with_ttl(redis_url, config.entity_ttl()).await?;
                Ok(Arc::new(Cache::Redis(cache)))
            }

            #[cfg(not(feature = "redis-cache"))]
            {
                anyhow::bail!(
                    "Redis cache driver is configured but the 'redis-cache' feature is not enabled. \
                     Either enable the feature with `--features redis-cache` or use 'memory' cache driver."
                )
            }
        }
    }
}
