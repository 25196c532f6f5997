use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::garment::{BodyMeasurements, Garment};

/// Lifecycle state of a try-on job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and Failed jobs are never touched by the pipeline again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What the job produces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    /// A still image of the source figure wearing the garments.
    TryOn,
    /// A short clip animated from the source image.
    Video,
}

impl JobKind {
    /// Logical bucket the generated artifact is written under.
    pub fn result_prefix(self) -> &'static str {
        match self {
            JobKind::TryOn => "tryon-results",
            JobKind::Video => "tryon-videos",
        }
    }
}

/// Where the figure in the composite comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceImage {
    /// A photo the user uploaded.
    ModelPhoto { path: String },
    /// The stored output of an earlier job ("chaining").
    PriorJob { job_id: Uuid },
}

/// A try-on or video generation request.
///
/// Created as `Pending` by the request layer with inputs already validated.
/// Only the pipeline mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub source: SourceImage,
    /// Ordered multi-garment association.
    pub garments: Vec<Garment>,
    /// Single garment reference from records that predate the association.
    pub legacy_garment: Option<Garment>,
    pub style_hint: Option<String>,
    pub body_measurements: Option<BodyMeasurements>,
    pub provider: Option<String>,
    pub provider_task_id: Option<String>,
    pub attempts: i32,
    pub result_path: Option<String>,
    pub duration_secs: Option<f64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True once an asynchronous provider accepted the job and handed back a task id.
    pub fn awaiting_task(&self) -> bool {
        self.status == JobStatus::Processing && self.provider_task_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trips_through_db_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(&status.to_string()).unwrap(), status);
        }
        assert_eq!(JobStatus::Processing.to_string(), "processing");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_result_prefixes() {
        assert_eq!(JobKind::TryOn.result_prefix(), "tryon-results");
        assert_eq!(JobKind::Video.result_prefix(), "tryon-videos");
        assert_eq!(JobKind::from_str("try_on").unwrap(), JobKind::TryOn);
    }
}
