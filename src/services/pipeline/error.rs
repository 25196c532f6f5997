use strum::Display;

use crate::db::StoreError;
use crate::services::media::FetchError;
use crate::services::providers::{ProviderError, RefusalKind};
use crate::services::queue::QueueError;
use crate::services::storage::StorageError;
use crate::services::url_guard::SsrfRejected;

/// Messages written to the job record. Diagnostic detail stays in the logs.
pub mod messages {
    pub const GENERIC: &str = "We couldn't create this look. Please try again.";
    pub const TIMED_OUT: &str = "This is taking longer than expected and timed out. Please try again.";
    pub const CONTENT_BLOCKED: &str =
        "The images were blocked by the provider's safety filter. Try a different photo or garment.";
    pub const NO_IMAGE: &str =
        "No image could be produced for this combination. Try a different photo or garment.";
    pub const NO_MEDIA: &str = "Generation finished without producing any media. Please try again.";
    pub const PROVIDER_FAILED: &str = "The provider could not complete this request. Please try again.";
}

/// Pipeline stage an error or timeout belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Submit,
    Poll,
}

#[derive(Debug, thiserror::Error)]
pub enum TryJobError {
    /// Transport or upstream-availability failure talking to a provider or its media host.
    #[error("provider request failed: {0}")]
    ProviderRequestFailed(String),

    /// The provider answered but rejected the request itself (bad input, auth, unsupported).
    #[error("provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("provider refused to produce output ({kind}): {detail}")]
    ProviderRefused { kind: RefusalKind, detail: String },

    #[error("media URL rejected: {0}")]
    SsrfRejected(#[from] SsrfRejected),

    #[error("blob storage failed: {0}")]
    StorageFailure(String),

    #[error("{stage} budget exhausted after {attempts} attempts")]
    TimeoutExceeded { stage: Stage, attempts: i32 },

    #[error("job inputs cannot be resolved: {0}")]
    InvalidInput(String),

    #[error("provider contract violated: {0}")]
    ProviderContract(String),

    #[error("job store failed: {0}")]
    Store(#[from] StoreError),

    #[error("scheduling the next run failed: {0}")]
    Scheduling(#[from] QueueError),
}

impl TryJobError {
    /// Whether another attempt within the stage budget may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TryJobError::ProviderRequestFailed(_)
                | TryJobError::StorageFailure(_)
                | TryJobError::Store(_)
                | TryJobError::Scheduling(_)
        )
    }

    /// Short message for the job record.
    pub fn user_message(&self) -> &'static str {
        match self {
            TryJobError::ProviderRefused {
                kind: RefusalKind::ContentBlocked,
                ..
            } => messages::CONTENT_BLOCKED,
            TryJobError::ProviderRefused {
                kind: RefusalKind::NoImage,
                ..
            } => messages::NO_IMAGE,
            TryJobError::TimeoutExceeded { .. } => messages::TIMED_OUT,
            _ => messages::GENERIC,
        }
    }

    /// Label for the failure metric.
    pub fn reason(&self) -> &'static str {
        match self {
            TryJobError::ProviderRequestFailed(_) => "provider_request_failed",
            TryJobError::ProviderRejected(_) => "provider_rejected",
            TryJobError::ProviderRefused { .. } => "provider_refused",
            TryJobError::SsrfRejected(_) => "ssrf_rejected",
            TryJobError::StorageFailure(_) => "storage_failure",
            TryJobError::TimeoutExceeded { .. } => "timeout",
            TryJobError::InvalidInput(_) => "invalid_input",
            TryJobError::ProviderContract(_) => "provider_contract",
            TryJobError::Store(_) => "store",
            TryJobError::Scheduling(_) => "scheduling",
        }
    }
}

impl From<ProviderError> for TryJobError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Refused { kind, detail } => TryJobError::ProviderRefused { kind, detail },
            ProviderError::Storage(inner) => TryJobError::StorageFailure(inner.to_string()),
            other if other.is_transient() => TryJobError::ProviderRequestFailed(other.to_string()),
            other => TryJobError::ProviderRejected(other.to_string()),
        }
    }
}

impl From<StorageError> for TryJobError {
    fn from(e: StorageError) -> Self {
        TryJobError::StorageFailure(e.to_string())
    }
}

impl From<FetchError> for TryJobError {
    fn from(e: FetchError) -> Self {
        match e {
            // Oversized media will be oversized next time too.
            FetchError::TooLarge(_) => TryJobError::ProviderRejected(e.to_string()),
            other => TryJobError::ProviderRequestFailed(other.to_string()),
        }
    }
}
