use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::api::{ApiError, JobStatusResponse};

/// GET /api/v1/try-jobs/{job_id}: Check try-on job status.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, (StatusCode, Json<ApiError>)> {
    let job = queries::get_job(&state.db, job_id).await.map_err(|e| {
        tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: "job_lookup_failed".to_string(),
            }),
        )
    })?;

    let job = job.ok_or((
        StatusCode::NOT_FOUND,
        Json(ApiError {
            error: "job_not_found".to_string(),
        }),
    ))?;

    let result_url = job.result_path.as_deref().map(|p| state.storage.url(p));
    Ok(Json(JobStatusResponse::from_job(&job, result_url)))
}
