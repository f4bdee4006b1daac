//! Service wiring
//!
//! Builds repositories, services and background workers from one database
//! pool and one cache, so the binary and the HTTP tests assemble the same
//! graph.

use crate::api::{AppState, RequestStats};
use crate::cache::Cache;
use crate::config::Config;
use crate::db::repositories::{SqlxCheckInRepository, SqlxParticipantRepository, SqlxSessionRepository};
use crate::db::DynDatabasePool;
use crate::services::{
    AdmissionController, BroadcastNotifier, CheckInService, DynEventSink, EntityCache,
    LifecycleScheduler, ParticipantService, SessionService,
};
use std::sync::Arc;

/// Everything the process runs
pub struct Application {
    pub state: AppState,
    pub scheduler: Arc<LifecycleScheduler>,
    pub admission: Arc<AdmissionController>,
}

impl Application {
    pub fn new(config: &Config, pool: DynDatabasePool, cache: Arc<Cache>) -> Self {
        let session_repo = SqlxSessionRepository::boxed(pool.clone());
        let participant_repo = SqlxParticipantRepository::boxed(pool.clone());
        let check_in_repo = SqlxCheckInRepository::boxed(pool.clone());

        let notifier = Arc::new(BroadcastNotifier::default());
        let sink: DynEventSink = notifier.clone();

        let entities = Arc::new(EntityCache::new(
            cache.clone(),
            session_repo.clone(),
            participant_repo.clone(),
            check_in_repo.clone(),
            config.cache.entity_ttl(),
            config.cache.stats_ttl(),
        ));
        let admission = Arc::new(AdmissionController::new(
            cache,
            session_repo.clone(),
            check_in_repo.clone(),
            config.cache.capacity_ttl(),
            config.reconciliation.clone(),
        ));

        let session_service = Arc::new(SessionService::new(
            session_repo.clone(),
            participant_repo.clone(),
            check_in_repo.clone(),
            entities.clone(),
            admission.clone(),
            sink.clone(),
        ));
        let participant_service = Arc::new(ParticipantService::new(
            participant_repo.clone(),
            entities.clone(),
        ));
        let check_in_service = Arc::new(CheckInService::new(
            entities.clone(),
            admission.clone(),
            participant_repo,
            check_in_repo,
            sink.clone(),
            config.checkin.late_threshold_minutes,
        ));
        let scheduler = Arc::new(LifecycleScheduler::new(
            session_repo,
            entities,
            sink,
            config.scheduler.clone(),
        ));

        let state = AppState {
            pool,
            session_service,
            participant_service,
            check_in_service,
            notifier,
            request_stats: Arc::new(RequestStats::new()),
        };

        Self {
            state,
            scheduler,
            admission,
        }
    }
}
