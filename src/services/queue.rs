use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

const SCHEDULE_KEY: &str = "tryon:scheduled";

/// Which handler a scheduled run should invoke.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStage {
    Submit,
    Poll,
}

/// Job payload serialized into Redis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub stage: JobStage,
}

/// Schedules future handler runs. The pipeline only decides whether and
/// after how long to run again; delivery belongs to the implementation.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn enqueue(&self, job: &QueuedJob, run_after: Duration) -> Result<(), QueueError>;
}

/// Hand a run back to the scheduler, retrying with doubling pauses when the
/// scheduler itself is failing. The last error is returned once `attempts`
/// are used up.
pub async fn requeue(
    scheduler: &dyn Scheduler,
    job: &QueuedJob,
    run_after: Duration,
    attempts: u32,
    backoff: Duration,
) -> Result<(), QueueError> {
    let mut pause = backoff;
    let mut attempt = 1;
    loop {
        match scheduler.enqueue(job, run_after).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    job_id = %job.job_id,
                    stage = %job.stage,
                    attempt,
                    error = %e,
                    "Re-enqueue failed, retrying"
                );
                tokio::time::sleep(pause).await;
                pause *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Redis-backed delayed job queue.
///
/// Runs live in a sorted set scored by their due time in milliseconds, so
/// re-enqueueing an identical payload only moves its due time.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Claim the earliest run that is due, if any.
    pub async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let now = now_millis();

        loop {
            let due: Vec<String> = conn
                .zrangebyscore_limit(SCHEDULE_KEY, "-inf", now, 0, 1)
                .await
                .map_err(QueueError::Redis)?;

            let Some(payload) = due.into_iter().next() else {
                return Ok(None);
            };

            // ZREM is the claim: only the worker that removes the member runs it.
            let removed: i64 = conn
                .zrem(SCHEDULE_KEY, &payload)
                .await
                .map_err(QueueError::Redis)?;
            if removed == 0 {
                continue;
            }

            let job: QueuedJob = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
            return Ok(Some(job));
        }
    }

    /// Schedule a run only if the job has no identical run queued. An existing
    /// entry keeps its due time. Returns whether a run was added.
    pub async fn enqueue_if_absent(&self, job: &QueuedJob, run_after: Duration) -> Result<bool, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        let due = now_millis() + run_after.as_millis() as i64;
        let added: i64 = redis::cmd("ZADD")
            .arg(SCHEDULE_KEY)
            .arg("NX")
            .arg(due)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(added > 0)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current number of scheduled runs.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.zcard(SCHEDULE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[async_trait]
impl Scheduler for JobQueue {
    async fn enqueue(&self, job: &QueuedJob, run_after: Duration) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        let due = now_millis() + run_after.as_millis() as i64;
        conn.zadd::<_, _, _, ()>(SCHEDULE_KEY, &payload, due)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
