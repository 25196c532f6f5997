use super::{messages, Stage, TryJobError, TryOnPipeline};
use crate::models::job::TryJob;
use crate::services::providers::{Submission, TryOnProvider};
use crate::services::queue::JobStage;

impl TryOnPipeline {
    /// Hand a pending job to its provider.
    ///
    /// Synchronous providers complete the job here. Asynchronous ones leave it
    /// Processing with a task id and a poll scheduled after the initial delay.
    pub async fn submit_try_job(&self, job: &TryJob) -> Result<(), TryJobError> {
        if job.is_terminal() {
            tracing::debug!(job_id = %job.id, status = %job.status, "Submit skipped, job is terminal");
            return Ok(());
        }

        if job.awaiting_task() {
            // Re-delivery after the task was accepted: make sure a poll is queued.
            tracing::debug!(job_id = %job.id, "Submit skipped, task already accepted");
            return self
                .schedule(job.id, JobStage::Poll, self.policy.initial_poll_delay)
                .await;
        }

        let configured = self.providers.for_kind(job.kind);
        let Some(slot) = self.store.begin_submission(job.id, configured.name()).await? else {
            tracing::debug!(job_id = %job.id, "Submit skipped, job changed state");
            return Ok(());
        };

        let Some(provider) = self.providers.get(&slot.provider) else {
            let err = TryJobError::ProviderContract(format!(
                "job is bound to unregistered provider {}",
                slot.provider
            ));
            return self.fail(job, &slot.provider, &err, messages::GENERIC).await;
        };

        tracing::info!(
            job_id = %job.id,
            kind = %job.kind,
            provider = provider.name(),
            attempt = slot.attempt,
            "Submitting try-on job"
        );
        metrics::counter!("tryon_jobs_submitted_total", "provider" => provider.name().to_string())
            .increment(1);

        match self.call_provider(job, provider.as_ref()).await {
            Ok(Submission::Sync(path)) => {
                if self.store.complete_job(job.id, &path, None).await? {
                    metrics::counter!(
                        "tryon_jobs_completed_total",
                        "provider" => provider.name().to_string()
                    )
                    .increment(1);
                    tracing::info!(job_id = %job.id, result_path = %path, "Try-on job completed");
                }
                Ok(())
            }
            Ok(Submission::Async(task_id)) => {
                self.store.attach_task(job.id, &task_id).await?;
                tracing::info!(
                    job_id = %job.id,
                    provider = provider.name(),
                    task_id = %task_id,
                    "Provider accepted task, polling scheduled"
                );
                self.schedule(job.id, JobStage::Poll, self.policy.initial_poll_delay)
                    .await
            }
            Err(err) => self.submission_failed(job, provider.name(), slot.attempt, err).await,
        }
    }

    async fn call_provider(
        &self,
        job: &TryJob,
        provider: &dyn TryOnProvider,
    ) -> Result<Submission, TryJobError> {
        let request = self.build_request(job).await?;
        let submission = provider.submit(&request).await?;

        // The declared shape and the returned variant must agree.
        match (&submission, provider.is_synchronous()) {
            (Submission::Sync(_), true) | (Submission::Async(_), false) => Ok(submission),
            (Submission::Sync(_), false) => Err(TryJobError::ProviderContract(format!(
                "asynchronous provider {} returned an inline result",
                provider.name()
            ))),
            (Submission::Async(_), true) => Err(TryJobError::ProviderContract(format!(
                "synchronous provider {} returned a task id",
                provider.name()
            ))),
        }
    }

    async fn submission_failed(
        &self,
        job: &TryJob,
        provider: &str,
        attempt: i32,
        err: TryJobError,
    ) -> Result<(), TryJobError> {
        if err.is_retryable() && self.policy.can_resubmit(attempt) {
            tracing::warn!(
                job_id = %job.id,
                provider,
                attempt,
                budget = self.policy.submit_attempts,
                error = %err,
                "Submission failed, will be retried"
            );
            return Err(err);
        }

        if err.is_retryable() {
            tracing::warn!(
                job_id = %job.id,
                provider,
                error = %err,
                "Submission budget exhausted"
            );
            let exhausted = TryJobError::TimeoutExceeded {
                stage: Stage::Submit,
                attempts: attempt,
            };
            // Exhausting the submission budget reads like any other failure to the user.
            return self.fail(job, provider, &exhausted, messages::GENERIC).await;
        }

        let message = err.user_message();
        self.fail(job, provider, &err, message).await
    }
}
