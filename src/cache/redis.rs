//! Redis cache implementation
//!
//! Provides a distributed cache using Redis for multi-instance deployments.
//!
//! # Features
//! - TTL-based expiration via SET with EX/PX
//! - Capacity counters updated by server-side Lua scripts, so the
//!   compare-and-increment is atomic across every instance sharing the server
//! - Incremental key listing via SCAN (production-safe, not KEYS)

use super::{CacheLayer, CounterOutcome, CounterReservation, ScanPage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult, Script};
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, warn};

/// Default TTL for cache entries (5 minutes)
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Seed-if-absent, compare and increment.
///
/// KEYS[1] counter key
/// ARGV[1] seed, ARGV[2] capacity (0 = unlimited), ARGV[3] enforced flag,
/// ARGV[4] ttl in milliseconds
///
/// Returns `{admitted, count}`.
const RESERVE_COUNTER_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    current = tonumber(ARGV[1])
    redis.call('SET', KEYS[1], current, 'PX', ARGV[4])
else
    current = tonumber(current)
end
local capacity = tonumber(ARGV[2])
if ARGV[3] == '1' and capacity > 0 and current >= capacity then
    return {0, current}
end
return {1, redis.call('INCR', KEYS[1])}
"#;

/// Decrement floored at zero. Returns nil when the key is absent.
const RELEASE_COUNTER_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return false
end
if tonumber(current) <= 0 then
    return 0
end
return redis.call('DECR', KEYS[1])
"#;

/// Upper bound on one connection attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// After a failed attempt, calls fail fast for this long before reconnecting
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ConnectionState {
    connection: Option<MultiplexedConnection>,
    retry_after: Option<Instant>,
}

/// Redis cache implementation
///
/// Values are stored as JSON strings to support generic types. Counters are
/// stored as plain integers so the Lua scripts can operate on them.
///
/// The connection is opened lazily and dropped on I/O errors. While Redis is
/// unreachable every call returns `Err`, which callers treat as a cache miss.
pub struct RedisCache {
    client: Client,
    state: Mutex<ConnectionState>,
    reserve_script: Script,
    release_script: Script,
    /// Default TTL for entries when not specified
    default_ttl: Duration,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Create a new Redis cache with the given connection URL
    ///
    /// # Errors
    /// Returns an error if the URL is invalid. An unreachable server is not
    /// an error.
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_ttl(redis_url, DEFAULT_TTL).await
    }

    /// Create a new Redis cache with custom default TTL
    ///
    /// # Errors
    /// Returns an error if the URL is invalid. An unreachable server is
    /// logged and the cache starts degraded.
    pub async fn with_ttl(redis_url: &str, default_ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url)
            .context("Failed to create Redis client")?;

        let cache = Self {
            client,
            state: Mutex::new(ConnectionState::default()),
            reserve_script: Script::new(RESERVE_COUNTER_SCRIPT),
            release_script: Script::new(RELEASE_COUNTER_SCRIPT),
            default_ttl,
        };

        if let Err(e) = cache.connection().await {
            error!(target: "rollcall.cache", error = %e, "Redis unavailable, starting with a degraded cache");
        }

        Ok(cache)
    }

    /// Get the default TTL for this cache
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }

    /// Current connection, connecting first if there is none
    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut state = self.state.lock().await;
        if let Some(connection) = &state.connection {
            return Ok(connection.clone());
        }
        if let Some(retry_after) = state.retry_after {
            if Instant::now() < retry_after {
                anyhow::bail!(
                    "Redis unavailable, next connection attempt in {:?}",
                    retry_after.saturating_duration_since(Instant::now())
                );
            }
        }

        let attempt = tokio::time::timeout(CONNECT_TIMEOUT, self.client.get_multiplexed_async_connection()).await;
        match attempt {
            Ok(Ok(connection)) => {
                if state.retry_after.take().is_some() {
                    warn!(target: "rollcall.cache", "Redis connection restored");
                }
                state.connection = Some(connection.clone());
                Ok(connection)
            }
            Ok(Err(e)) => {
                state.retry_after = Some(Instant::now() + RECONNECT_BACKOFF);
                Err(e).context("Failed to connect to Redis")
            }
            Err(_) => {
                state.retry_after = Some(Instant::now() + RECONNECT_BACKOFF);
                anyhow::bail!("Timed out connecting to Redis after {:?}", CONNECT_TIMEOUT)
            }
        }
    }

    /// Forget the connection when a command failed at the transport level
    async fn track<T>(&self, result: RedisResult<T>) -> RedisResult<T> {
        if let Err(e) = &result {
            if e.is_io_error() || e.is_connection_dropped() {
                warn!(target: "rollcall.cache", error = %e, "Redis connection lost");
                let mut state = self.state.lock().await;
                state.connection = None;
                state.retry_after = Some(Instant::now() + RECONNECT_BACKOFF);
            }
        }
        result
    }
}

#[async_trait]
impl CacheLayer for RedisCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection().await?;

        let result: RedisResult<Option<String>> = conn
            .get(key)
            .await;
        let cached = self.track(result).await.context("Failed to get value from Redis")?;

        match cached {
            Some(json) => {
                let value = serde_json::from_str(&json)
                    .context("Failed to deserialize cached value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;

        let json = serde_json::to_string(value)
            .context("Failed to serialize cache value")?;

        let result: RedisResult<()> = conn
            .pset_ex(key, json, Self::ttl_millis(ttl))
            .await;
        self.track(result).await.context("Failed to set value in Redis")?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;

        let result: RedisResult<()> = conn
            .del(key)
            .await;
        self.track(result).await.context("Failed to delete key from Redis")?;

        Ok(())
    }

    async fn reserve_counter(&self, key: &str, request: CounterReservation) -> Result<CounterOutcome> {
        let mut conn = self.connection().await?;

        let result: RedisResult<(i64, i64)> = self
            .reserve_script
            .key(key)
            .arg(request.seed)
            .arg(request.capacity)
            .arg(if request.enforced { 1 } else { 0 })
            .arg(Self::ttl_millis(request.ttl))
            .invoke_async(&mut conn)
            .await;
        let (admitted, count) = self.track(result).await.context("Failed to run reserve counter script")?;

        Ok(CounterOutcome {
            admitted: admitted == 1,
            count,
        })
    }

    async fn release_counter(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.connection().await?;

        let result: RedisResult<Option<i64>> = self
            .release_script
            .key(key)
            .invoke_async(&mut conn)
            .await;
        let remaining = self.track(result).await.context("Failed to run release counter script")?;

        Ok(remaining)
    }

    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;

        let result: RedisResult<()> = conn
            .pset_ex(key, value, Self::ttl_millis(ttl))
            .await;
        self.track(result).await.context("Failed to set counter in Redis")?;

        Ok(())
    }

    async fn get_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;

        let result: RedisResult<Vec<Option<i64>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await;
        let values = self.track(result).await.context("Failed to read counters from Redis")?;

        Ok(values)
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<ScanPage> {
        let mut conn = self.connection().await?;

        let result: RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await;
        let (cursor, keys) = self.track(result).await.context("Failed to scan keys in Redis")?;

        Ok(ScanPage { cursor, keys })
    }
}
