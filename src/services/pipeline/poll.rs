use std::time::Instant;

use super::{messages, Stage, TryJobError, TryOnPipeline};
use crate::models::job::{JobKind, TryJob};
use crate::services::media::image_format;
use crate::services::providers::{MediaRef, TaskState, TryOnProvider};
use crate::services::queue::JobStage;
use crate::services::storage::random_path;

/// What one status check decided.
enum PollOutcome {
    /// The job reached a terminal state during this check.
    Finished,
    /// The task is still running.
    Pending,
}

impl TryOnPipeline {
    /// Check an asynchronous task once and act on the answer.
    ///
    /// Pending tasks and transient errors both reschedule while the poll
    /// budget lasts; exhausting it fails the job with a timeout.
    pub async fn poll_try_job(&self, job: &TryJob) -> Result<(), TryJobError> {
        if job.is_terminal() {
            tracing::debug!(job_id = %job.id, status = %job.status, "Poll skipped, job is terminal");
            return Ok(());
        }

        let (Some(provider_name), Some(task_id)) = (&job.provider, &job.provider_task_id) else {
            tracing::warn!(job_id = %job.id, status = %job.status, "Poll skipped, job has no task");
            return Ok(());
        };

        let Some(provider) = self.providers.get(provider_name) else {
            let err = TryJobError::ProviderContract(format!(
                "job is bound to unregistered provider {}",
                provider_name
            ));
            return self.fail(job, provider_name, &err, messages::GENERIC).await;
        };

        let Some(attempt) = self.store.record_poll_attempt(job.id).await? else {
            tracing::debug!(job_id = %job.id, "Poll skipped, job changed state");
            return Ok(());
        };
        metrics::counter!("tryon_poll_attempts_total", "provider" => provider_name.clone())
            .increment(1);

        let outcome = self.check_task(job, provider.as_ref(), task_id).await;
        let pending_reason = match outcome {
            Ok(PollOutcome::Finished) => return Ok(()),
            Ok(PollOutcome::Pending) => None,
            Err(err) if err.is_retryable() => Some(err),
            Err(err) => {
                let message = err.user_message();
                return self.fail(job, provider_name, &err, message).await;
            }
        };

        if let Some(err) = &pending_reason {
            tracing::warn!(
                job_id = %job.id,
                provider = %provider_name,
                task_id = %task_id,
                attempt,
                error = %err,
                "Status check failed, treating as transient"
            );
        }

        if self.policy.can_repoll(attempt) {
            tracing::debug!(
                job_id = %job.id,
                task_id = %task_id,
                attempt,
                budget = self.policy.poll_attempts,
                "Task still pending"
            );
            return self
                .schedule(job.id, JobStage::Poll, self.policy.poll_interval)
                .await;
        }

        let timeout = TryJobError::TimeoutExceeded {
            stage: Stage::Poll,
            attempts: attempt,
        };
        if let Some(err) = pending_reason {
            tracing::error!(job_id = %job.id, task_id = %task_id, error = %err, "Last status check failed");
        }
        self.fail(job, provider_name, &timeout, messages::TIMED_OUT).await
    }

    async fn check_task(
        &self,
        job: &TryJob,
        provider: &dyn TryOnProvider,
        task_id: &str,
    ) -> Result<PollOutcome, TryJobError> {
        let status = provider.poll_status(job.kind, task_id).await?;

        match status.state {
            TaskState::Pending => Ok(PollOutcome::Pending),
            TaskState::Failed => {
                let reason = status.fail_reason.as_deref().unwrap_or(messages::PROVIDER_FAILED);
                let err = TryJobError::ProviderRejected(format!("task {} failed: {}", task_id, reason));
                self.fail(job, provider.name(), &err, reason).await?;
                Ok(PollOutcome::Finished)
            }
            TaskState::Succeeded => {
                let Some(media) = status.results.first() else {
                    let err = TryJobError::ProviderRejected(format!(
                        "task {} succeeded without media",
                        task_id
                    ));
                    self.fail(job, provider.name(), &err, messages::NO_MEDIA).await?;
                    return Ok(PollOutcome::Finished);
                };
                self.materialize(job, provider.name(), media).await?;
                Ok(PollOutcome::Finished)
            }
        }
    }

    /// Download the finished artifact through the URL guard and store it.
    async fn materialize(
        &self,
        job: &TryJob,
        provider: &str,
        media: &MediaRef,
    ) -> Result<(), TryJobError> {
        let target = match self.guard.assert_safe_external_url(&media.url).await {
            Ok(target) => target,
            Err(rejected) => {
                metrics::counter!("tryon_ssrf_rejections_total").increment(1);
                tracing::warn!(
                    target: "security",
                    job_id = %job.id,
                    provider,
                    url = %media.url,
                    reason = %rejected,
                    "Provider media URL rejected"
                );
                return Err(rejected.into());
            }
        };

        let started = Instant::now();
        let fetched = self.fetcher.fetch(&target).await?;
        metrics::histogram!("tryon_media_download_seconds").record(started.elapsed().as_secs_f64());

        let (extension, content_type) = match job.kind {
            JobKind::TryOn => image_format(&fetched.bytes),
            JobKind::Video => ("mp4", "video/mp4"),
        };
        let path = random_path(job.kind.result_prefix(), extension);
        self.blobs.put(&path, &fetched.bytes, content_type).await?;

        if self.store.complete_job(job.id, &path, media.duration_secs).await? {
            metrics::counter!("tryon_jobs_completed_total", "provider" => provider.to_string())
                .increment(1);
            tracing::info!(
                job_id = %job.id,
                provider,
                result_path = %path,
                bytes = fetched.bytes.len(),
                duration_secs = ?media.duration_secs,
                "Try-on job completed"
            );
        } else {
            // Another delivery finished the job first; drop our copy.
            tracing::info!(job_id = %job.id, result_path = %path, "Job already terminal, discarding result");
            if let Err(e) = self.blobs.delete(&path).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to delete discarded result");
            }
        }
        Ok(())
    }
}
