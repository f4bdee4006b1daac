//! Shared wiring for service tests

use crate::cache::{Cache, MemoryCache};
use crate::config::{CacheConfig, ReconciliationConfig, SchedulerConfig};
use crate::db::repositories::{
    CheckInRepository, ParticipantRepository, SessionRepository, SqlxCheckInRepository,
    SqlxParticipantRepository, SqlxSessionRepository,
};
use crate::db::{create_file_test_pool, create_test_pool, migrations, DynDatabasePool};
use crate::models::{
    CheckInMethod, CheckInResult, CreateCheckInInput, CreateParticipantInput, CreateSessionInput,
    Participant, Session, SessionStatus,
};
use crate::services::admission::AdmissionController;
use crate::services::check_in::{CheckInError, CheckInService};
use crate::services::entity_cache::EntityCache;
use crate::services::lifecycle::LifecycleScheduler;
use crate::services::notifier::RecordingSink;
use crate::services::participant::ParticipantService;
use crate::services::session::SessionService;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub struct Fixture {
    pub pool: DynDatabasePool,
    pub cache: Arc<Cache>,
    pub session_repo: Arc<dyn SessionRepository>,
    pub entities: Arc<EntityCache>,
    pub admission: Arc<AdmissionController>,
    pub sink: Arc<RecordingSink>,
    pub sessions: SessionService,
    pub participants: ParticipantService,
    pub check_ins: Arc<CheckInService>,
    pub scheduler: LifecycleScheduler,
}

/// Services over an in-memory database, reconciling without a grace window
pub async fn fixture() -> Fixture {
    fixture_with(ReconciliationConfig {
        grace_seconds: 0,
        ..ReconciliationConfig::default()
    })
    .await
}

pub async fn fixture_with(reconcile: ReconciliationConfig) -> Fixture {
    let pool = create_test_pool().await.unwrap();
    build(pool, reconcile).await
}

/// Services over a database file in `dir`, for tests with concurrent writers
pub async fn file_fixture(dir: &std::path::Path) -> Fixture {
    let pool = create_file_test_pool(dir).await.unwrap();
    build(
        pool,
        ReconciliationConfig {
            grace_seconds: 0,
            ..ReconciliationConfig::default()
        },
    )
    .await
}

async fn build(pool: DynDatabasePool, reconcile: ReconciliationConfig) -> Fixture {
    migrations::run_migrations(&pool).await.unwrap();

    let cache_config = CacheConfig::default();
    let cache = Arc::new(Cache::Memory(MemoryCache::new()));
    let session_repo: Arc<dyn SessionRepository> = SqlxSessionRepository::boxed(pool.clone());
    let participant_repo: Arc<dyn ParticipantRepository> = SqlxParticipantRepository::boxed(pool.clone());
    let check_in_repo: Arc<dyn CheckInRepository> = SqlxCheckInRepository::boxed(pool.clone());
    let sink = Arc::new(RecordingSink::default());

    let entities = Arc::new(EntityCache::new(
        cache.clone(),
        session_repo.clone(),
        participant_repo.clone(),
        check_in_repo.clone(),
        cache_config.entity_ttl(),
        cache_config.stats_ttl(),
    ));
    let admission = Arc::new(AdmissionController::new(
        cache.clone(),
        session_repo.clone(),
        check_in_repo.clone(),
        cache_config.capacity_ttl(),
        reconcile,
    ));

    Fixture {
        sessions: SessionService::new(
            session_repo.clone(),
            participant_repo.clone(),
            check_in_repo.clone(),
            entities.clone(),
            admission.clone(),
            sink.clone(),
        ),
        participants: ParticipantService::new(participant_repo.clone(), entities.clone()),
        check_ins: Arc::new(CheckInService::new(
            entities.clone(),
            admission.clone(),
            participant_repo,
            check_in_repo,
            sink.clone(),
            15,
        )),
        scheduler: LifecycleScheduler::new(
            session_repo.clone(),
            entities.clone(),
            sink.clone(),
            SchedulerConfig::default(),
        ),
        pool,
        cache,
        session_repo,
        entities,
        admission,
        sink,
    }
}

impl Fixture {
    /// A second scheduler instance sharing the store, as in another process
    pub fn second_scheduler(&self) -> LifecycleScheduler {
        LifecycleScheduler::new(
            self.session_repo.clone(),
            self.entities.clone(),
            self.sink.clone(),
            SchedulerConfig::default(),
        )
    }

    /// Make every cache call fail, or bring the cache back
    pub fn set_cache_offline(&self, offline: bool) {
        match self.cache.as_ref() {
            Cache::Memory(memory) => memory.set_offline(offline),
            #[cfg(feature = "redis-cache")]
            Cache::Redis(_) => {}
        }
    }

    /// A SCHEDULED session starting at `start` and lasting one hour
    pub async fn scheduled_session(&self, start: DateTime<Utc>) -> Session {
        self.sessions
            .create(CreateSessionInput::new("Workshop", start, start + Duration::hours(1)))
            .await
            .unwrap()
    }

    /// An OPEN session that started five minutes ago
    pub async fn open_session(&self, capacity: Option<i64>) -> Session {
        self.open_session_with(|input| input.capacity = capacity).await
    }

    pub async fn open_session_with(&self, customize: impl FnOnce(&mut CreateSessionInput)) -> Session {
        let start = Utc::now() - Duration::minutes(5);
        let mut input = CreateSessionInput::new("Keynote", start, start + Duration::hours(1));
        customize(&mut input);
        let created = self.sessions.create(input).await.unwrap();

        // Opened behind the services so no event is recorded
        self.session_repo
            .set_status(&created.id, SessionStatus::Open, Utc::now())
            .await
            .unwrap();
        self.entities.invalidate_session(&created.id).await;
        self.session_repo.get_by_id(&created.id).await.unwrap().unwrap()
    }

    pub async fn participant(&self, qr_code: &str) -> Participant {
        self.participants
            .create(CreateParticipantInput {
                name: format!("Holder of {}", qr_code),
                email: None,
                qr_code: Some(qr_code.to_string()),
            })
            .await
            .unwrap()
    }

    pub async fn check_in(
        &self,
        participant: &Participant,
        session: &Session,
    ) -> Result<CheckInResult, CheckInError> {
        self.check_ins
            .check_in(CreateCheckInInput {
                participant_id: participant.id.clone(),
                session_id: session.id.clone(),
                method: CheckInMethod::Qr,
            })
            .await
    }
}
