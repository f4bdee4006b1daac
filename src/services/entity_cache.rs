//! Cache façade for sessions, participants and session statistics
//!
//! Every lookup goes through [`CachedLoader::get_or_load`]:
//! - values are stored wrapped in [`CachedValue`], so a cached `data: None`
//!   records that the durable store had nothing and is served without another
//!   store read
//! - concurrent misses on the same key inside this process wait on a per-key
//!   lock and re-check the cache, so only the first caller reads the store
//! - cache errors are logged and treated as misses; only store errors reach
//!   the caller
//!
//! The per-key locks live in process memory. Separate processes sharing a
//! Redis cache can still load the same key concurrently.

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::{CheckInRepository, ParticipantRepository, SessionRepository};
use crate::models::{Participant, Session, SessionStats};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Cache wrapper distinguishing "cached as absent" from "not cached"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedValue<T> {
    pub data: Option<T>,
    pub cached_at: DateTime<Utc>,
}

/// Per-key coordination for loads in flight
#[derive(Default)]
struct KeyState {
    lock: tokio::sync::Mutex<()>,
    /// Bumped when the key is invalidated; a load that started before the
    /// bump does not write its result back
    generation: AtomicU64,
}

type InflightMap = Mutex<HashMap<String, Arc<KeyState>>>;

/// Read-through loader for one entity type
pub struct CachedLoader {
    cache: Arc<Cache>,
    ttl: Duration,
    inflight: InflightMap,
}

/// Removes the in-flight entry once its last user is gone, including when
/// the caller's future is dropped mid-load
struct InflightGuard<'a> {
    inflight: &'a InflightMap,
    key: &'a str,
    state: Arc<KeyState>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        // Map entry plus ours: nobody else is waiting on this key
        if Arc::strong_count(&self.state) == 2 {
            inflight.remove(self.key);
        }
    }
}

impl CachedLoader {
    pub fn new(cache: Arc<Cache>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key`, or run `load` and cache its result
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, load: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(cached) = self.read::<T>(key).await {
            return Ok(cached.data);
        }

        let entry = self.enter(key);
        let _held = entry.state.lock.lock().await;

        // Another caller may have populated the key while we waited
        if let Some(cached) = self.read::<T>(key).await {
            return Ok(cached.data);
        }

        let generation = entry.state.generation.load(Ordering::Acquire);
        let data = load().await?;
        if entry.state.generation.load(Ordering::Acquire) == generation {
            self.write(key, &data).await;
        }
        Ok(data)
    }

    /// Drop a key after its durable record changed
    pub async fn invalidate(&self, key: &str) {
        {
            let inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(state) = inflight.get(key) {
                state.generation.fetch_add(1, Ordering::AcqRel);
            }
        }
        if let Err(e) = self.cache.delete(key).await {
            warn!(target: "rollcall.cache", key, error = %e, "Cache invalidation failed");
        }
    }

    async fn read<T: DeserializeOwned + Send>(&self, key: &str) -> Option<CachedValue<T>> {
        match self.cache.get::<CachedValue<T>>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(target: "rollcall.cache", key, error = %e, "Cache read failed, using durable store");
                None
            }
        }
    }

    async fn write<T: Serialize + Send + Sync>(&self, key: &str, data: &Option<T>) {
        let wrapped = CachedValue {
            data: data.as_ref(),
            cached_at: Utc::now(),
        };
        match self.cache.set(key, &wrapped, self.ttl).await {
            Ok(()) => debug!(target: "rollcall.cache", key, found = data.is_some(), "Cached lookup result"),
            Err(e) => warn!(target: "rollcall.cache", key, error = %e, "Cache write failed"),
        }
    }

    fn enter<'a>(&'a self, key: &'a str) -> InflightGuard<'a> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        let state = inflight.entry(key.to_string()).or_default().clone();
        InflightGuard {
            inflight: &self.inflight,
            key,
            state,
        }
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight.lock().unwrap().len()
    }
}

pub fn session_key(id: &str) -> String {
    format!("session:{}", id)
}

pub fn participant_key(id: &str) -> String {
    format!("participant:{}", id)
}

pub fn participant_qr_key(qr_code: &str) -> String {
    format!("participant:qr:{}", qr_code)
}

pub fn stats_key(session_id: &str) -> String {
    format!("stats:{}", session_id)
}

/// Cached access to the entities read on the check-in path
pub struct EntityCache {
    sessions: Arc<dyn SessionRepository>,
    participants: Arc<dyn ParticipantRepository>,
    check_ins: Arc<dyn CheckInRepository>,
    entities: CachedLoader,
    stats: CachedLoader,
}

impl EntityCache {
    pub fn new(
        cache: Arc<Cache>,
        sessions: Arc<dyn SessionRepository>,
        participants: Arc<dyn ParticipantRepository>,
        check_ins: Arc<dyn CheckInRepository>,
        entity_ttl: Duration,
        stats_ttl: Duration,
    ) -> Self {
        Self {
            sessions,
            participants,
            check_ins,
            entities: CachedLoader::new(cache.clone(), entity_ttl),
            stats: CachedLoader::new(cache, stats_ttl),
        }
    }

    pub async fn session(&self, id: &str) -> Result<Option<Session>> {
        let repo = self.sessions.clone();
        self.entities
            .get_or_load(&session_key(id), || async move { repo.get_by_id(id).await })
            .await
    }

    pub async fn invalidate_session(&self, id: &str) {
        self.entities.invalidate(&session_key(id)).await;
    }

    pub async fn participant(&self, id: &str) -> Result<Option<Participant>> {
        let repo = self.participants.clone();
        self.entities
            .get_or_load(&participant_key(id), || async move { repo.get_by_id(id).await })
            .await
    }

    pub async fn participant_by_qr(&self, qr_code: &str) -> Result<Option<Participant>> {
        let repo = self.participants.clone();
        self.entities
            .get_or_load(&participant_qr_key(qr_code), || async move {
                repo.get_by_qr_code(qr_code).await
            })
            .await
    }

    /// Drop both lookups of a participant
    pub async fn invalidate_participant(&self, participant: &Participant) {
        self.entities.invalidate(&participant_key(&participant.id)).await;
        self.entities.invalidate(&participant_qr_key(&participant.qr_code)).await;
    }

    pub async fn stats(&self, session_id: &str) -> Result<SessionStats> {
        let repo = self.check_ins.clone();
        let stats = self
            .stats
            .get_or_load(&stats_key(session_id), || async move {
                repo.stats(session_id).await.map(Some)
            })
            .await?;
        Ok(stats.unwrap_or_default())
    }

    pub async fn invalidate_stats(&self, session_id: &str) {
        self.stats.invalidate(&stats_key(session_id)).await;
    }
}
