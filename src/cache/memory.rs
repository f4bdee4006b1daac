//! In-memory cache implementation using moka
//!
//! Provides a fast, thread-safe in-memory cache with per-entry TTL support.
//!
//! Values live in a moka cache with a custom [`Expiry`] so each entry keeps the
//! TTL it was written with. Counters live in a separate ordered map guarded by
//! a mutex, which makes `reserve_counter` atomic within this process. That is
//! enough for single-instance deployments; multi-instance deployments need the
//! Redis backend.
//!
//! `scan` only walks the counter map. Plain values are never enumerated.

use super::{CacheLayer, CounterOutcome, CounterReservation, ScanPage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default maximum cache capacity (number of entries)
const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// Default TTL for cache entries (5 minutes)
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Outstanding scan cursors kept before the oldest is forgotten
const MAX_OPEN_CURSORS: usize = 64;

/// Cache entry wrapper that stores serialized JSON data together with its TTL
#[derive(Clone)]
struct CacheEntry {
    data: Arc<String>,
    ttl: Duration,
}

impl CacheEntry {
    fn new<T: Serialize>(value: &T, ttl: Duration) -> Result<Self> {
        let json = serde_json::to_string(value)
            .context("Failed to serialize cache value")?;
        Ok(Self {
            data: Arc::new(json),
            ttl,
        })
    }

    fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data)
            .context("Failed to deserialize cache value")
    }
}

/// Expiry policy honouring the TTL stored in each entry
struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &CacheEntry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Debug, Clone, Copy)]
struct CounterSlot {
    value: i64,
    expires_at: Instant,
}

impl CounterSlot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory cache using moka
pub struct MemoryCache {
    cache: Cache<String, CacheEntry>,
    counters: Mutex<BTreeMap<String, CounterSlot>>,
    /// Scan cursor id -> last key returned under it
    cursors: Mutex<BTreeMap<u64, String>>,
    next_cursor: AtomicU64,
    default_ttl: Duration,
    #[cfg(test)]
    offline: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entry_count", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl MemoryCache {
    /// Create a new memory cache with default settings
    pub fn new() -> Self {
        Self::with_capacity_and_ttl(DEFAULT_MAX_CAPACITY, DEFAULT_TTL)
    }

    /// Create a new memory cache with custom capacity and default TTL
    ///
    /// The default TTL is an upper bound: entries written with a shorter TTL
    /// expire earlier.
    pub fn with_capacity_and_ttl(max_capacity: u64, default_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(default_ttl)
            .expire_after(PerEntryTtl)
            .build();

        Self {
            cache,
            counters: Mutex::new(BTreeMap::new()),
            cursors: Mutex::new(BTreeMap::new()),
            next_cursor: AtomicU64::new(1),
            default_ttl,
            #[cfg(test)]
            offline: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Get the default TTL for this cache
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn counters(&self) -> MutexGuard<'_, BTreeMap<String, CounterSlot>> {
        // A poisoned lock only means another task panicked mid-update; the map
        // itself is still structurally valid.
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail every call, as an unreachable server would
    #[cfg(test)]
    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        #[cfg(test)]
        {
            if self.offline.load(Ordering::SeqCst) {
                anyhow::bail!("Cache offline");
            }
        }
        Ok(())
    }

    fn cursors(&self) -> MutexGuard<'_, BTreeMap<u64, String>> {
        self.cursors.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remember where a scan stopped and hand out a cursor for it
    fn open_cursor(&self, last_key: String) -> u64 {
        let id = self.next_cursor.fetch_add(1, Ordering::Relaxed).max(1);
        let mut cursors = self.cursors();
        cursors.insert(id, last_key);
        while cursors.len() > MAX_OPEN_CURSORS {
            cursors.pop_first();
        }
        id
    }

    /// Literal part of a glob pattern before its first wildcard
    fn literal_prefix(pattern: &str) -> &str {
        pattern
            .find(['*', '?'])
            .map_or(pattern, |end| &pattern[..end])
    }

    /// Glob-style match supporting `*` and `?`
    fn pattern_matches(pattern: &str, key: &str) -> bool {
        let pattern: Vec<char> = pattern.chars().collect();
        let key: Vec<char> = key.chars().collect();

        let (mut p, mut k) = (0usize, 0usize);
        let mut backtrack: Option<(usize, usize)> = None;

        while k < key.len() {
            match pattern.get(p) {
                Some('*') => {
                    backtrack = Some((p, k));
                    p += 1;
                }
                Some('?') => {
                    p += 1;
                    k += 1;
                }
                Some(c) if key.get(k) == Some(c) => {
                    p += 1;
                    k += 1;
                }
                _ => match backtrack {
                    Some((star_p, star_k)) => {
                        p = star_p + 1;
                        k = star_k + 1;
                        backtrack = Some((star_p, star_k + 1));
                    }
                    None => return false,
                },
            }
        }

        pattern.iter().skip(p).all(|c| *c == '*')
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheLayer for MemoryCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        self.ensure_online()?;
        match self.cache.get(key).await {
            Some(entry) => Ok(Some(entry.deserialize()?)),
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        self.ensure_online()?;
        let entry = CacheEntry::new(value, ttl)?;
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_online()?;
        self.cache.invalidate(key).await;
        self.counters().remove(key);
        Ok(())
    }

    async fn reserve_counter(&self, key: &str, request: CounterReservation) -> Result<CounterOutcome> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut counters = self.counters();

        let slot = match counters.get(key) {
            Some(slot) if slot.is_live(now) => *slot,
            _ => CounterSlot {
                value: request.seed,
                expires_at: now + request.ttl,
            },
        };

        let full = request.enforced && request.capacity > 0 && slot.value >= request.capacity;
        let updated = if full {
            slot
        } else {
            CounterSlot {
                value: slot.value + 1,
                ..slot
            }
        };
        counters.insert(key.to_string(), updated);

        Ok(CounterOutcome {
            admitted: !full,
            count: updated.value,
        })
    }

    async fn release_counter(&self, key: &str) -> Result<Option<i64>> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut counters = self.counters();

        match counters.get_mut(key) {
            Some(slot) if slot.is_live(now) => {
                slot.value = (slot.value - 1).max(0);
                Ok(Some(slot.value))
            }
            Some(_) => {
                counters.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        self.ensure_online()?;
        self.counters().insert(
            key.to_string(),
            CounterSlot {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>> {
        self.ensure_online()?;
        let now = Instant::now();
        let counters = self.counters();
        Ok(keys
            .iter()
            .map(|key| {
                counters
                    .get(key)
                    .filter(|slot| slot.is_live(now))
                    .map(|slot| slot.value)
            })
            .collect())
    }

    /// Scan counters in key order
    ///
    /// Each call examines at most `count` counters, starting after the last
    /// key the cursor returned, so a page may come back empty with a non-zero
    /// cursor. Keys written mid-iteration may or may not be seen, as with
    /// Redis. An unknown or forgotten cursor restarts the iteration.
    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<ScanPage> {
        self.ensure_online()?;
        let prefix = Self::literal_prefix(pattern);
        let resume = match cursor {
            0 => None,
            id => self.cursors().remove(&id),
        };
        let lower = match &resume {
            Some(last) if last.as_str() >= prefix => Bound::Excluded(last.as_str()),
            _ => Bound::Included(prefix),
        };

        let now = Instant::now();
        let budget = count.max(1);
        let mut examined = 0usize;
        let mut last_examined = None;
        let mut keys = Vec::new();
        {
            let counters = self.counters();
            let window = counters
                .range::<str, _>((lower, Bound::Unbounded))
                .take_while(|(key, _)| key.starts_with(prefix))
                .take(budget);
            for (key, slot) in window {
                examined += 1;
                last_examined = Some(key.clone());
                if slot.is_live(now) && Self::pattern_matches(pattern, key) {
                    keys.push(key.clone());
                }
            }
        }

        let next = match last_examined {
            Some(last) if examined == budget => self.open_cursor(last),
            _ => 0,
        };
        Ok(ScanPage { cursor: next, keys })
    }
}
