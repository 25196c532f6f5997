use std::time::Duration;

use tryon_pipeline::{
    config::AppConfig,
    db::{self, queries, JobStore, PgJobStore},
    models::{
        api::JobStatusResponse,
        job::{JobKind, JobStatus, SourceImage},
    },
    services::{
        queue::{JobQueue, JobStage, QueuedJob, Scheduler},
        storage::{random_path, BlobStore, R2Client},
    },
};
use uuid::Uuid;

/// Integration test: job lifecycle against real backing services
///
/// This test verifies:
/// 1. Database connection and schema
/// 2. Job creation with its garment association
/// 3. The conditional state transitions used by the pipeline
/// 4. R2 storage (put/get/delete)
/// 5. Scheduled-run queue (enqueue/dequeue)
///
/// Note: This requires running PostgreSQL and Redis instances and R2
/// credentials configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    // Load config from environment
    let config = AppConfig::from_env().expect("Failed to load config");

    // Initialize database
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let user_id = Uuid::new_v4();

    // 1. Seed a garment the job can reference
    let garment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO garments (user_id, image_path, category, sizing)
        VALUES ($1, 'garments/test-shirt.png', 'upper', '{"size_label":"M","chest_cm":104}')
        RETURNING id
        "#,
    )
    .bind(user_id)
    .fetch_one(&db_pool)
    .await
    .expect("Failed to insert garment");

    // 2. Create the job
    let job_id = queries::create_job(
        &db_pool,
        &queries::NewTryJob {
            user_id,
            kind: JobKind::TryOn,
            source: SourceImage::ModelPhoto {
                path: "models/test-user.jpg".to_string(),
            },
            garment_ids: vec![garment_id],
            legacy_garment_id: None,
            style_hint: Some("casual".to_string()),
        },
    )
    .await
    .expect("Failed to create job");

    let store = PgJobStore::new(db_pool.clone());
    let job = store
        .get_job(job_id)
        .await
        .expect("Failed to load job")
        .expect("Job not found");

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.garments.len(), 1);
    assert_eq!(job.garments[0].sizing.size_label.as_deref(), Some("M"));
    assert_eq!(job.attempts, 0);

    // 3. Submission binds the provider and counts the attempt
    let slot = store
        .begin_submission(job_id, "kling")
        .await
        .expect("begin_submission failed")
        .expect("Job should accept a submission");
    assert_eq!(slot.attempt, 1);
    assert_eq!(slot.provider, "kling");

    // A later attempt keeps the bound provider
    let slot = store
        .begin_submission(job_id, "gemini")
        .await
        .expect("begin_submission failed")
        .expect("Job should accept a submission");
    assert_eq!(slot.attempt, 2);
    assert_eq!(slot.provider, "kling");

    store
        .attach_task(job_id, "task-integration")
        .await
        .expect("attach_task failed");

    // Waiting on a task: no more submissions, polls are counted
    assert!(store
        .begin_submission(job_id, "kling")
        .await
        .expect("begin_submission failed")
        .is_none());
    assert_eq!(
        store.record_poll_attempt(job_id).await.expect("record_poll_attempt failed"),
        Some(1)
    );

    let unfinished = queries::get_unfinished_jobs(&db_pool, 10_000)
        .await
        .expect("Failed to list unfinished jobs");
    assert!(unfinished.contains(&(job_id, JobStage::Poll)));

    // 4. Store the result in R2
    let storage = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
        &config.r2_public_url,
    )
    .expect("Failed to initialize R2");

    let path = random_path("tryon-results", "png");
    let url = storage
        .put(&path, b"fake image data for testing", "image/png")
        .await
        .expect("R2 put failed");
    assert_eq!(url, storage.url(&path));

    let downloaded = storage.get(&path).await.expect("R2 get failed");
    assert_eq!(downloaded, b"fake image data for testing");

    // 5. Completion happens once
    assert!(store
        .complete_job(job_id, &path, None)
        .await
        .expect("complete_job failed"));
    assert!(!store
        .complete_job(job_id, "tryon-results/other.png", None)
        .await
        .expect("complete_job failed"));
    assert!(!store
        .fail_job(job_id, "late failure")
        .await
        .expect("fail_job failed"));

    let job = store
        .get_job(job_id)
        .await
        .expect("Failed to load job")
        .expect("Job not found");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result_path.as_deref(), Some(path.as_str()));
    assert!(job.error.is_none());

    // 6. Queue round trip
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize queue");
    let queued = QueuedJob {
        job_id,
        stage: JobStage::Poll,
    };
    queue
        .enqueue(&queued, Duration::ZERO)
        .await
        .expect("Failed to enqueue");
    // Re-enqueueing the same run does not duplicate it
    queue
        .enqueue(&queued, Duration::ZERO)
        .await
        .expect("Failed to enqueue");

    let mut seen = 0;
    while let Some(run) = queue.dequeue().await.expect("Failed to dequeue") {
        if run == queued {
            seen += 1;
        }
    }
    assert_eq!(seen, 1);

    // The recovery sweep only fills gaps
    assert!(queue
        .enqueue_if_absent(&queued, Duration::from_secs(60))
        .await
        .expect("Failed to enqueue"));
    assert!(!queue
        .enqueue_if_absent(&queued, Duration::ZERO)
        .await
        .expect("Failed to enqueue"));
    assert!(queue.dequeue().await.expect("Failed to dequeue").is_none());

    // Cleanup
    storage.delete(&path).await.expect("R2 delete failed");
    sqlx::query("DELETE FROM try_jobs WHERE id = $1")
        .bind(job_id)
        .execute(&db_pool)
        .await
        .expect("Failed to delete job");
    sqlx::query("DELETE FROM garments WHERE id = $1")
        .bind(garment_id)
        .execute(&db_pool)
        .await
        .expect("Failed to delete garment");
}

#[test]
fn test_status_response_hides_internal_fields() {
    let now = chrono::Utc::now();
    let job = tryon_pipeline::models::job::TryJob {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        kind: JobKind::Video,
        status: JobStatus::Completed,
        source: SourceImage::PriorJob {
            job_id: Uuid::new_v4(),
        },
        garments: Vec::new(),
        legacy_garment: None,
        style_hint: None,
        body_measurements: None,
        provider: Some("kling".to_string()),
        provider_task_id: Some("task-1".to_string()),
        attempts: 4,
        result_path: Some("tryon-videos/a.mp4".to_string()),
        duration_secs: Some(5.0),
        error: None,
        created_at: now,
        updated_at: now,
    };

    let response = JobStatusResponse::from_job(
        &job,
        Some("https://media.example.com/tryon-videos/a.mp4".to_string()),
    );
    let body = serde_json::to_value(&response).unwrap();

    assert_eq!(body["status"], "completed");
    assert_eq!(body["kind"], "video");
    assert_eq!(body["duration_secs"], 5.0);
    assert!(body.get("provider_task_id").is_none());
    assert!(body.get("attempts").is_none());
}
