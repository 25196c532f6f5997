use std::str::FromStr;

use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::garment::{BodyMeasurements, Garment, GarmentCategory, GarmentSizing};
use crate::models::job::{JobKind, SourceImage, TryJob};
use crate::services::queue::JobStage;

const JOB_COLUMNS: &str = r#"
    id, user_id, kind, status, model_image_path, source_job_id, legacy_garment_id,
    style_hint, provider, provider_task_id, attempts, result_path, duration_secs,
    error, created_at, updated_at
"#;

/// New job as handed over by the request layer.
#[derive(Debug, Clone)]
pub struct NewTryJob {
    pub user_id: Uuid,
    pub kind: JobKind,
    pub source: SourceImage,
    pub garment_ids: Vec<Uuid>,
    pub legacy_garment_id: Option<Uuid>,
    pub style_hint: Option<String>,
}

/// Insert a new pending job and its garment association
pub async fn create_job(pool: &PgPool, job: &NewTryJob) -> Result<Uuid, sqlx::Error> {
    let (model_image_path, source_job_id) = match &job.source {
        SourceImage::ModelPhoto { path } => (Some(path.as_str()), None),
        SourceImage::PriorJob { job_id } => (None, Some(*job_id)),
    };

    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        INSERT INTO try_jobs (user_id, kind, status, model_image_path, source_job_id,
                              legacy_garment_id, style_hint)
        VALUES ($1, $2, 'pending', $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(job.user_id)
    .bind(job.kind.to_string())
    .bind(model_image_path)
    .bind(source_job_id)
    .bind(job.legacy_garment_id)
    .bind(job.style_hint.as_deref())
    .fetch_one(&mut *tx)
    .await?;
    let id: Uuid = row.try_get("id")?;

    for (position, garment_id) in job.garment_ids.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO try_job_garments (try_job_id, garment_id, position)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(garment_id)
        .bind(position as i16)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(id)
}

/// Get a job by ID with its garments and the owner's measurements
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<TryJob>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {} FROM try_jobs WHERE id = $1", JOB_COLUMNS))
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let garments = sqlx::query(
        r#"
        SELECT g.id, g.image_path, g.category, g.sizing
        FROM try_job_garments tg
        JOIN garments g ON g.id = tg.garment_id
        WHERE tg.try_job_id = $1
        ORDER BY tg.position ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(garment_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    let legacy_id: Option<Uuid> = row.try_get("legacy_garment_id")?;
    let legacy_garment = match legacy_id {
        Some(id) => sqlx::query("SELECT id, image_path, category, sizing FROM garments WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .as_ref()
            .map(garment_from_row)
            .transpose()?,
        None => None,
    };

    let user_id: Uuid = row.try_get("user_id")?;
    let body_measurements = sqlx::query(
        r#"
        SELECT height_cm, chest_cm, waist_cm, hips_cm, inseam_cm, shoulder_cm
        FROM user_measurements
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .map(|r| -> Result<BodyMeasurements, sqlx::Error> {
        Ok(BodyMeasurements {
            height_cm: r.try_get("height_cm")?,
            chest_cm: r.try_get("chest_cm")?,
            waist_cm: r.try_get("waist_cm")?,
            hips_cm: r.try_get("hips_cm")?,
            inseam_cm: r.try_get("inseam_cm")?,
            shoulder_cm: r.try_get("shoulder_cm")?,
        })
    })
    .transpose()?;

    Ok(Some(job_from_row(&row, garments, legacy_garment, body_measurements)?))
}

fn job_from_row(
    row: &PgRow,
    garments: Vec<Garment>,
    legacy_garment: Option<Garment>,
    body_measurements: Option<BodyMeasurements>,
) -> Result<TryJob, sqlx::Error> {
    let model_image_path: Option<String> = row.try_get("model_image_path")?;
    let source_job_id: Option<Uuid> = row.try_get("source_job_id")?;
    let source = match (source_job_id, model_image_path) {
        (Some(job_id), _) => SourceImage::PriorJob { job_id },
        (None, Some(path)) => SourceImage::ModelPhoto { path },
        (None, None) => {
            return Err(sqlx::Error::ColumnDecode {
                index: "model_image_path".to_string(),
                source: "job has neither a model photo nor a source job".into(),
            })
        }
    };

    Ok(TryJob {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: parse_column(row, "kind")?,
        status: parse_column(row, "status")?,
        source,
        garments,
        legacy_garment,
        style_hint: row.try_get("style_hint")?,
        body_measurements,
        provider: row.try_get("provider")?,
        provider_task_id: row.try_get("provider_task_id")?,
        attempts: row.try_get("attempts")?,
        result_path: row.try_get("result_path")?,
        duration_secs: row.try_get("duration_secs")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn garment_from_row(row: &PgRow) -> Result<Garment, sqlx::Error> {
    let sizing: Option<Json<GarmentSizing>> = row.try_get("sizing")?;
    Ok(Garment {
        id: row.try_get("id")?,
        image_path: row.try_get("image_path")?,
        category: parse_column::<GarmentCategory>(row, "category")?,
        sizing: sizing.map(|j| j.0).unwrap_or_default(),
    })
}

fn parse_column<T: FromStr>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    T::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// Start (or restart) a submission attempt.
///
/// The provider is recorded on the first attempt and never overwritten.
/// Returns the new attempt count and the provider the job is bound to, or
/// `None` if the job is already terminal or already holds a task id.
pub async fn begin_submission(
    pool: &PgPool,
    job_id: Uuid,
    provider: &str,
) -> Result<Option<(i32, String)>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE try_jobs
        SET status = 'processing',
            provider = COALESCE(provider, $2),
            attempts = attempts + 1,
            updated_at = NOW()
        WHERE id = $1
          AND status IN ('pending', 'processing')
          AND provider_task_id IS NULL
        RETURNING attempts, provider
        "#,
    )
    .bind(job_id)
    .bind(provider)
    .fetch_optional(pool)
    .await?;

    row.map(|r| -> Result<(i32, String), sqlx::Error> {
        Ok((r.try_get("attempts")?, r.try_get("provider")?))
    })
    .transpose()
}

/// Store the provider's task id and reset the attempt counter for polling
pub async fn attach_task(pool: &PgPool, job_id: Uuid, task_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE try_jobs
        SET provider_task_id = $2,
            attempts = 0,
            updated_at = NOW()
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(job_id)
    .bind(task_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Increment the attempt counter of a job waiting on its task
pub async fn record_poll_attempt(pool: &PgPool, job_id: Uuid) -> Result<Option<i32>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE try_jobs
        SET attempts = attempts + 1,
            updated_at = NOW()
        WHERE id = $1 AND status = 'processing' AND provider_task_id IS NOT NULL
        RETURNING attempts
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| r.try_get("attempts")).transpose()
}

/// Move a job to Completed. Terminal jobs are left as they are.
pub async fn complete_job(
    pool: &PgPool,
    job_id: Uuid,
    result_path: &str,
    duration_secs: Option<f64>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE try_jobs
        SET status = 'completed',
            result_path = $2,
            duration_secs = $3,
            error = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(job_id)
    .bind(result_path)
    .bind(duration_secs)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move a job to Failed. Terminal jobs are left as they are.
pub async fn fail_job(pool: &PgPool, job_id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE try_jobs
        SET status = 'failed',
            error = $2,
            result_path = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(job_id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Non-terminal jobs and the stage each one should resume at (for worker start-up)
pub async fn get_unfinished_jobs(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<(Uuid, JobStage)>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, provider_task_id
        FROM try_jobs
        WHERE status IN ('pending', 'processing')
        ORDER BY created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let task_id: Option<String> = r.try_get("provider_task_id")?;
            let stage = if task_id.is_some() {
                JobStage::Poll
            } else {
                JobStage::Submit
            };
            Ok((r.try_get("id")?, stage))
        })
        .collect()
}
