use std::time::Duration;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::models::job::TryJob;

pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// A submission attempt that was allowed to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionSlot {
    /// Attempt count including this one.
    pub attempt: i32,
    /// Provider the job is bound to. Set by the first attempt, kept by later ones.
    pub provider: String,
}

/// Persistence for try-on jobs.
///
/// Every state-changing call is conditional on the job's current state, so a
/// re-delivered handler cannot move a terminal job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, job_id: Uuid) -> Result<Option<TryJob>, StoreError>;

    /// Mark the job Processing, bind the provider if unbound and count the attempt.
    /// `None` when the job is terminal or already waiting on a task.
    async fn begin_submission(
        &self,
        job_id: Uuid,
        provider: &str,
    ) -> Result<Option<SubmissionSlot>, StoreError>;

    /// Store the task id and reset the attempt counter for the poll stage.
    async fn attach_task(&self, job_id: Uuid, task_id: &str) -> Result<(), StoreError>;

    /// Count a status check. `None` when the job is not waiting on a task.
    async fn record_poll_attempt(&self, job_id: Uuid) -> Result<Option<i32>, StoreError>;

    /// Returns false if the job was already terminal.
    async fn complete_job(
        &self,
        job_id: Uuid,
        result_path: &str,
        duration_secs: Option<f64>,
    ) -> Result<bool, StoreError>;

    /// Returns false if the job was already terminal.
    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<bool, StoreError>;
}

/// [`JobStore`] backed by the PostgreSQL pool.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get_job(&self, job_id: Uuid) -> Result<Option<TryJob>, StoreError> {
        Ok(queries::get_job(&self.pool, job_id).await?)
    }

    async fn begin_submission(
        &self,
        job_id: Uuid,
        provider: &str,
    ) -> Result<Option<SubmissionSlot>, StoreError> {
        let slot = queries::begin_submission(&self.pool, job_id, provider).await?;
        Ok(slot.map(|(attempt, provider)| SubmissionSlot { attempt, provider }))
    }

    async fn attach_task(&self, job_id: Uuid, task_id: &str) -> Result<(), StoreError> {
        Ok(queries::attach_task(&self.pool, job_id, task_id).await?)
    }

    async fn record_poll_attempt(&self, job_id: Uuid) -> Result<Option<i32>, StoreError> {
        Ok(queries::record_poll_attempt(&self.pool, job_id).await?)
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        result_path: &str,
        duration_secs: Option<f64>,
    ) -> Result<bool, StoreError> {
        Ok(queries::complete_job(&self.pool, job_id, result_path, duration_secs).await?)
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<bool, StoreError> {
        Ok(queries::fail_job(&self.pool, job_id, error).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
