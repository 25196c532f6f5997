use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{self, PgJobStore};
use crate::services::{
    media::HttpMediaFetcher,
    pipeline::TryOnPipeline,
    providers::{registry::RegistryError, ProviderRegistry},
    queue::{JobQueue, QueueError},
    storage::{BlobStore, R2Client, StorageError},
    url_guard::UrlGuard,
};

/// Shared application state passed to route handlers and the worker loop.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub storage: Arc<dyn BlobStore>,
    pub queue: Arc<JobQueue>,
    pub providers: Arc<ProviderRegistry>,
    pub pipeline: Arc<TryOnPipeline>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        storage: Arc<dyn BlobStore>,
        queue: JobQueue,
        providers: ProviderRegistry,
        config: &AppConfig,
    ) -> Self {
        let queue = Arc::new(queue);
        let providers = Arc::new(providers);
        let pipeline = TryOnPipeline::new(
            Arc::new(PgJobStore::new(db.clone())),
            storage.clone(),
            queue.clone(),
            providers.clone(),
            UrlGuard::system(),
            Arc::new(HttpMediaFetcher::new()),
            config.retry_policy(),
        );

        Self {
            db,
            storage,
            queue,
            providers,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Connect every backing service described by `config`.
    pub async fn connect(config: &AppConfig) -> Result<Self, InitError> {
        tracing::info!("Connecting to PostgreSQL database");
        let db_pool = db::init_pool(&config.database_url).await?;

        tracing::info!("Initializing R2 storage client");
        let storage: Arc<dyn BlobStore> = Arc::new(R2Client::new(
            &config.r2_bucket,
            &config.r2_endpoint,
            &config.r2_access_key,
            &config.r2_secret_key,
            &config.r2_public_url,
        )?);

        tracing::info!("Connecting to Redis job queue");
        let queue = JobQueue::new(&config.redis_url)?;

        tracing::info!("Building provider registry");
        let providers = ProviderRegistry::from_config(config, storage.clone())?;

        Ok(Self::new(db_pool, storage, queue, providers, config))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("queue: {0}")]
    Queue(#[from] QueueError),

    #[error("providers: {0}")]
    Providers(#[from] RegistryError),
}
