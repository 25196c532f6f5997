use serde::Serialize;
use uuid::Uuid;

use crate::models::job::{JobKind, JobStatus, TryJob};

/// Response for querying try-on job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub result_url: Option<String>,
    pub duration_secs: Option<f64>,
    pub error: Option<String>,
}

impl JobStatusResponse {
    pub fn from_job(job: &TryJob, result_url: Option<String>) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind,
            status: job.status,
            result_url,
            duration_secs: job.duration_secs,
            error: job.error.clone(),
        }
    }
}

/// Error body returned by the HTTP surface.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}
