//! Try-on providers.
//!
//! Providers differ in temporal shape (inline result vs. task to poll) and in
//! how many garments they take per call. [`TryOnProvider`] hides both so the
//! pipeline never needs to know which one it is talking to.

pub mod gemini;
pub mod kling;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;
use strum::Display;

use crate::models::garment::{BodyMeasurements, Garment, GarmentSizing};
use crate::models::job::JobKind;

pub use registry::ProviderRegistry;

/// Everything a provider needs to compose one job.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub kind: JobKind,
    /// Blob path of the figure image (model photo or chained result).
    pub source_image: String,
    /// 1 to 5 garments, in the order the user picked them.
    pub garments: Vec<Garment>,
    pub style_hint: Option<String>,
    /// Only present when at least one real measurement exists.
    pub measurements: Option<MeasurementContext>,
}

/// Sizing details passed to providers that can use them in a prompt.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MeasurementContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyMeasurements>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub garments: Vec<GarmentMeasurement>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GarmentMeasurement {
    /// Position of the garment in the request's garment list.
    pub index: usize,
    pub sizing: GarmentSizing,
}

impl MeasurementContext {
    pub fn is_empty(&self) -> bool {
        self.body.is_none() && self.garments.is_empty()
    }

    /// One line per measured item, for text prompts.
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        if let Some(body) = &self.body {
            let parts = [
                ("height", body.height_cm),
                ("chest", body.chest_cm),
                ("waist", body.waist_cm),
                ("hips", body.hips_cm),
                ("inseam", body.inseam_cm),
                ("shoulders", body.shoulder_cm),
            ];
            lines.push(format!("Person: {}", join_measurements(&parts)));
        }
        for g in &self.garments {
            let parts = [
                ("chest", g.sizing.chest_cm),
                ("waist", g.sizing.waist_cm),
                ("hips", g.sizing.hips_cm),
                ("length", g.sizing.length_cm),
                ("sleeve", g.sizing.sleeve_cm),
            ];
            let mut line = format!("Garment {}:", g.index + 1);
            if let Some(label) = &g.sizing.size_label {
                line.push_str(&format!(" size {}", label));
            }
            let measured = join_measurements(&parts);
            if !measured.is_empty() {
                line.push(' ');
                line.push_str(&measured);
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

fn join_measurements(parts: &[(&str, Option<f64>)]) -> String {
    parts
        .iter()
        .filter_map(|(name, v)| v.map(|v| format!("{} {:.0} cm", name, v)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result of handing a job to a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The artifact was produced inline and stored at this blob path.
    Sync(String),
    /// The provider accepted a task; poll it with this id.
    Async(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Succeeded,
    Failed,
}

/// A media file a finished task points at.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRef {
    pub url: String,
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatus {
    pub state: TaskState,
    pub results: Vec<MediaRef>,
    pub fail_reason: Option<String>,
}

impl TaskStatus {
    pub fn pending() -> Self {
        Self {
            state: TaskState::Pending,
            results: Vec::new(),
            fail_reason: None,
        }
    }
}

/// Why a provider declined to produce output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RefusalKind {
    /// Blocked by the provider's content-safety filter.
    ContentBlocked,
    /// Ran to completion without returning an image.
    NoImage,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("provider refused the request ({kind}): {detail}")]
    Refused { kind: RefusalKind, detail: String },

    #[error("provider response could not be parsed: {0}")]
    Parse(String),

    #[error("provider does not support {0}")]
    Unsupported(String),

    #[error("provider storage access failed: {0}")]
    Storage(#[from] crate::services::storage::StorageError),

    #[error("provider credentials are invalid: {0}")]
    Auth(String),
}

impl ProviderError {
    /// Transport failures and upstream 5xx/429 are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Request(_) | ProviderError::Storage(_) => true,
            ProviderError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Parse(e.to_string())
        } else {
            ProviderError::Request(e.to_string())
        }
    }
}

/// A composition backend.
///
/// `is_synchronous` is constant per instance and must agree with the variant
/// `submit` returns: synchronous providers only ever return
/// [`Submission::Sync`], asynchronous ones only [`Submission::Async`].
#[async_trait]
pub trait TryOnProvider: Send + Sync {
    fn name(&self) -> &str;

    fn is_synchronous(&self) -> bool;

    /// Whether this provider can produce `kind` artifacts at all.
    fn supports(&self, kind: JobKind) -> bool;

    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, ProviderError>;

    async fn poll_status(&self, kind: JobKind, task_id: &str) -> Result<TaskStatus, ProviderError>;
}
