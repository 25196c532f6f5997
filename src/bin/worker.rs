use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;
use tryon_pipeline::{
    app_state::AppState,
    config::AppConfig,
    db::queries,
    services::queue::{requeue, JobStage, QueuedJob},
};

const POLL_INTERVAL_MS: u64 = 1000; // 1 second
const RECOVERY_BATCH: i64 = 1000;
const RECOVERY_INTERVAL: Duration = Duration::from_secs(60);
const REQUEUE_ATTEMPTS: u32 = 5;
const REQUEUE_BACKOFF: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting try-on worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");

    let state = AppState::connect(&config)
        .await
        .expect("Failed to initialize worker state");

    tracing::info!(providers = ?state.providers.names(), "Worker ready");

    if let Err(e) = recover_unfinished_jobs(&state, Duration::ZERO).await {
        tracing::error!(error = %e, "Failed to re-enqueue unfinished jobs");
    }
    let mut next_sweep = Instant::now() + RECOVERY_INTERVAL;

    tracing::info!("Starting job processing loop");

    // Main processing loop
    loop {
        // Catches runs whose re-enqueue was lost while Redis was unreachable.
        if Instant::now() >= next_sweep {
            let grace = state.pipeline.policy().poll_interval;
            if let Err(e) = recover_unfinished_jobs(&state, grace).await {
                tracing::error!(error = %e, "Recovery sweep failed");
            }
            next_sweep = Instant::now() + RECOVERY_INTERVAL;
        }

        match process_next_job(&state).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs due, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Give every non-terminal job without a queued run one, due after `delay`.
/// Jobs that already have a run keep its due time.
async fn recover_unfinished_jobs(
    state: &AppState,
    delay: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let unfinished = queries::get_unfinished_jobs(&state.db, RECOVERY_BATCH).await?;

    let mut count = 0;
    for (job_id, stage) in unfinished {
        if state
            .queue
            .enqueue_if_absent(&QueuedJob { job_id, stage }, delay)
            .await?
        {
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!(count, "Re-enqueued unfinished jobs");
    }
    Ok(())
}

/// Run the next due handler from the queue.
/// Returns Ok(true) if a job was processed, Ok(false) if nothing was due.
async fn process_next_job(state: &AppState) -> Result<bool, Box<dyn std::error::Error>> {
    let queued = match state.queue.dequeue().await? {
        Some(q) => q,
        None => return Ok(false),
    };

    tracing::info!(job_id = %queued.job_id, stage = %queued.stage, "Processing scheduled run");

    if let Err(e) = state.pipeline.run(&queued).await {
        // The pipeline already checked the job's attempt budget; this is
        // only a redelivery, it does not count anything.
        let policy = state.pipeline.policy();
        let delay = match queued.stage {
            JobStage::Submit => policy.submit_retry_delay,
            JobStage::Poll => policy.poll_interval,
        };

        tracing::warn!(
            job_id = %queued.job_id,
            stage = %queued.stage,
            error = %e,
            retry_in_secs = delay.as_secs(),
            "Run failed, re-queueing"
        );
        let requeued = requeue(
            state.queue.as_ref(),
            &queued,
            delay,
            REQUEUE_ATTEMPTS,
            REQUEUE_BACKOFF,
        )
        .await;
        if let Err(e) = requeued {
            // Still unfinished in the database, so the next sweep picks it up.
            tracing::error!(
                job_id = %queued.job_id,
                stage = %queued.stage,
                error = %e,
                "Re-enqueue failed, leaving run to the recovery sweep"
            );
        }
    }

    Ok(true)
}
