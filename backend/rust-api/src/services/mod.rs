use crate::config::Config;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::models::Question;
use crate::utils::clock::{Clock, SystemClock};
use content_service::{ContentProvider, MongoContentProvider, StaticContentProvider};
use eligibility_service::{EligibilityGate, InMemoryEligibilityGate, MongoEligibilityGate};
use exam_service::ExamService;
use exam_store::{ExamStore, InMemoryExamStore, MongoExamStore};
use lives_service::{LivesLedger, RestorePolicy};
use lives_store::{InMemoryLivesStore, LivesStore, RedisLivesStore};

pub mod content_service;
pub mod countdown;
pub mod eligibility_service;
pub mod exam_runtime;
pub mod exam_service;
pub mod exam_store;
pub mod lives_service;
pub mod lives_store;
pub mod question_selection;
pub mod scoring;
pub mod violation_detector;

/// Storage and content collaborators the service is assembled from.
pub struct Backends {
    pub exam_store: Arc<dyn ExamStore>,
    pub lives_store: Arc<dyn LivesStore>,
    pub content: Arc<dyn ContentProvider>,
    pub eligibility: Arc<dyn EligibilityGate>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Process-local backends over a fixed question catalog.
    pub fn in_memory(questions: Vec<Question>) -> Self {
        Self {
            exam_store: Arc::new(InMemoryExamStore::new()),
            lives_store: Arc::new(InMemoryLivesStore::new()),
            content: Arc::new(StaticContentProvider::new(questions)),
            eligibility: Arc::new(InMemoryEligibilityGate::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub exams: ExamService,
    /// Practice lives, restored after the configured cooldown.
    pub lives: LivesLedger,
    pub exam_store: Arc<dyn ExamStore>,
    pub lives_store: Arc<dyn LivesStore>,
    pub eligibility: Arc<dyn EligibilityGate>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo: Database = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let lives_store = RedisLivesStore::new(redis);
        lives_store.ping().await?;
        tracing::info!("Redis connection established successfully");

        let content: Arc<dyn ContentProvider> = match &config.content_catalog_path {
            Some(path) => Arc::new(StaticContentProvider::from_json_file(path).await?),
            None => Arc::new(MongoContentProvider::new(mongo.clone())),
        };

        let backends = Backends {
            exam_store: Arc::new(MongoExamStore::new(mongo.clone())),
            lives_store: Arc::new(lives_store),
            content,
            eligibility: Arc::new(MongoEligibilityGate::new(mongo)),
            clock: Arc::new(SystemClock),
        };

        Ok(Self::with_backends(config, backends))
    }

    pub fn with_backends(config: Config, backends: Backends) -> Self {
        let lives = LivesLedger::new(
            backends.lives_store.clone(),
            backends.clock,
            config.exam.max_lives,
            RestorePolicy::Cooldown(config.exam.life_restore_cooldown()),
        );
        let exams = ExamService::new(
            config.exam.clone(),
            backends.content,
            backends.exam_store.clone(),
            backends.eligibility.clone(),
        );

        Self {
            config,
            exams,
            lives,
            exam_store: backends.exam_store,
            lives_store: backends.lives_store,
            eligibility: backends.eligibility,
        }
    }
}
