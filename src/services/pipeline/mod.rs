//! The try-on job pipeline.
//!
//! [`TryOnPipeline::submit_try_job`] hands a pending job to its provider and
//! [`TryOnPipeline::poll_try_job`] follows an asynchronous task until it
//! finishes. Both are driven by an external scheduler, run at most once at a
//! time per job, and are safe to re-deliver: every path either moves the job
//! forward, reschedules within the attempt budget, or leaves a terminal job
//! alone.
//!
//! Handlers return `Err` only for a retryable submission failure with budget
//! left, so the scheduler can deliver the submission again. Attempts are
//! counted on the job record, never by the scheduler.

mod error;
mod inputs;
mod poll;
mod submit;

use std::sync::Arc;

use uuid::Uuid;

use crate::db::JobStore;
use crate::models::job::TryJob;
use crate::services::media::MediaFetcher;
use crate::services::providers::ProviderRegistry;
use crate::services::queue::{JobStage, QueuedJob, Scheduler};
use crate::services::retry::RetryPolicy;
use crate::services::storage::BlobStore;
use crate::services::url_guard::UrlGuard;

pub use error::{messages, Stage, TryJobError};
pub use inputs::{build_measurement_context, resolve_garments, MAX_GARMENTS};

pub struct TryOnPipeline {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    scheduler: Arc<dyn Scheduler>,
    providers: Arc<ProviderRegistry>,
    guard: UrlGuard,
    fetcher: Arc<dyn MediaFetcher>,
    policy: RetryPolicy,
}

impl TryOnPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        scheduler: Arc<dyn Scheduler>,
        providers: Arc<ProviderRegistry>,
        guard: UrlGuard,
        fetcher: Arc<dyn MediaFetcher>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            blobs,
            scheduler,
            providers,
            guard,
            fetcher,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Load a job and run the handler for `stage`. Missing jobs are logged and skipped.
    pub async fn run(&self, queued: &QueuedJob) -> Result<(), TryJobError> {
        let Some(job) = self.store.get_job(queued.job_id).await? else {
            tracing::warn!(job_id = %queued.job_id, stage = %queued.stage, "Scheduled job no longer exists");
            return Ok(());
        };

        match queued.stage {
            JobStage::Submit => self.submit_try_job(&job).await,
            JobStage::Poll => self.poll_try_job(&job).await,
        }
    }

    async fn schedule(
        &self,
        job_id: Uuid,
        stage: JobStage,
        delay: std::time::Duration,
    ) -> Result<(), TryJobError> {
        self.scheduler
            .enqueue(&QueuedJob { job_id, stage }, delay)
            .await?;
        tracing::debug!(
            job_id = %job_id,
            stage = %stage,
            delay_secs = delay.as_secs(),
            "Scheduled next run"
        );
        Ok(())
    }

    /// Terminal failure: record the user-facing message and log the detail.
    async fn fail(
        &self,
        job: &TryJob,
        provider: &str,
        error: &TryJobError,
        message: &str,
    ) -> Result<(), TryJobError> {
        let changed = self.store.fail_job(job.id, message).await?;
        if changed {
            metrics::counter!(
                "tryon_jobs_failed_total",
                "provider" => provider.to_string(),
                "reason" => error.reason()
            )
            .increment(1);
            tracing::error!(
                job_id = %job.id,
                provider,
                reason = error.reason(),
                error = %error,
                "Try-on job failed"
            );
        } else {
            tracing::debug!(job_id = %job.id, "Job already terminal, failure not recorded");
        }
        Ok(())
    }
}
