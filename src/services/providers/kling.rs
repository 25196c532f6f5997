//! Kling AI task-based provider.
//!
//! Single-garment virtual try-on (Kolors) and image-to-video. Both endpoints
//! accept a task and hand back a task id that has to be polled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    MediaRef, ProviderError, RefusalKind, Submission, SubmitRequest, TaskState, TaskStatus,
    TryOnProvider,
};
use crate::models::garment::Garment;
use crate::models::job::JobKind;
use crate::services::storage::BlobStore;

pub const NAME: &str = "kling";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_TTL_SECS: i64 = 1800;
const TRY_ON_MODEL: &str = "kolors-virtual-try-on-v1-5";
const VIDEO_MODEL: &str = "kling-v1-6";
const VIDEO_DURATION: &str = "5";
const DEFAULT_VIDEO_PROMPT: &str =
    "The person turns slowly to show the outfit from the front and side, natural lighting";

pub struct KlingProvider {
    http: Client,
    base_url: String,
    access_key: String,
    secret_key: String,
    blobs: Arc<dyn BlobStore>,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    exp: i64,
    nbf: i64,
}

#[derive(Serialize)]
struct TryOnRequest<'a> {
    model_name: &'a str,
    human_image: String,
    cloth_image: String,
}

#[derive(Serialize)]
struct VideoRequest<'a> {
    model_name: &'a str,
    image: String,
    prompt: &'a str,
    duration: &'a str,
    mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    task_id: String,
    task_status: String,
    #[serde(default)]
    task_status_msg: Option<String>,
    #[serde(default)]
    task_result: Option<TaskResult>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskResult {
    #[serde(default)]
    images: Vec<ResultMedia>,
    #[serde(default)]
    videos: Vec<ResultMedia>,
}

#[derive(Debug, Deserialize)]
struct ResultMedia {
    url: String,
    /// Seconds; Kling sends it as a string.
    #[serde(default)]
    duration: Option<serde_json::Value>,
}

impl KlingProvider {
    pub fn new(
        base_url: &str,
        access_key: &str,
        secret_key: &str,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            blobs,
        })
    }

    /// Short-lived HS256 bearer token.
    fn token(&self) -> Result<String, ProviderError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.access_key,
            exp: now + TOKEN_TTL_SECS,
            nbf: now - 5,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret_key.as_bytes()),
        )
        .map_err(|e| ProviderError::Auth(e.to_string()))
    }

    fn endpoint(kind: JobKind) -> &'static str {
        match kind {
            JobKind::TryOn => "/v1/images/kolors-virtual-try-on",
            JobKind::Video => "/v1/videos/image2video",
        }
    }

    async fn encoded(&self, path: &str) -> Result<String, ProviderError> {
        let bytes = self.blobs.get(path).await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = request.bearer_auth(self.token()?).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(env) => env,
            Err(_) if status >= 400 => return Err(ProviderError::Api { status, body }),
            Err(e) => return Err(ProviderError::Parse(e.to_string())),
        };

        if envelope.code != 0 || status >= 400 {
            return Err(classify_error(status, envelope.code, envelope.message));
        }

        envelope
            .data
            .ok_or_else(|| ProviderError::Parse("response has no data".to_string()))
    }
}

#[async_trait]
impl TryOnProvider for KlingProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn is_synchronous(&self) -> bool {
        false
    }

    fn supports(&self, _kind: JobKind) -> bool {
        true
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, ProviderError> {
        let url = format!("{}{}", self.base_url, Self::endpoint(request.kind));
        let builder = match request.kind {
            JobKind::TryOn => {
                let garment = single_garment(request)?;
                let body = TryOnRequest {
                    model_name: TRY_ON_MODEL,
                    human_image: self.encoded(&request.source_image).await?,
                    cloth_image: self.encoded(&garment.image_path).await?,
                };
                self.http.post(&url).json(&body)
            }
            JobKind::Video => {
                let body = VideoRequest {
                    model_name: VIDEO_MODEL,
                    image: self.encoded(&request.source_image).await?,
                    prompt: request.style_hint.as_deref().unwrap_or(DEFAULT_VIDEO_PROMPT),
                    duration: VIDEO_DURATION,
                    mode: "std",
                };
                self.http.post(&url).json(&body)
            }
        };

        let data: TaskData = self.send(builder).await?;
        tracing::debug!(
            provider = NAME,
            task_id = %data.task_id,
            task_status = %data.task_status,
            "Task accepted"
        );
        Ok(Submission::Async(data.task_id))
    }

    async fn poll_status(&self, kind: JobKind, task_id: &str) -> Result<TaskStatus, ProviderError> {
        let url = format!("{}{}/{}", self.base_url, Self::endpoint(kind), task_id);
        let data: TaskData = self.send(self.http.get(&url)).await?;
        Ok(task_status(data))
    }
}

/// Kolors composes exactly one garment per call; outfits are layered by
/// chaining jobs, so a multi-garment request is refused up front.
fn single_garment(request: &SubmitRequest) -> Result<&Garment, ProviderError> {
    match request.garments.as_slice() {
        [garment] => Ok(garment),
        [] => Err(ProviderError::Unsupported("try-on without a garment".into())),
        more => Err(ProviderError::Unsupported(format!(
            "{} garments in one try-on, {} composes one at a time",
            more.len(),
            NAME
        ))),
    }
}

fn task_status(data: TaskData) -> TaskStatus {
    match data.task_status.as_str() {
        "succeed" => {
            let result = data.task_result.unwrap_or_default();
            let results = result
                .images
                .into_iter()
                .chain(result.videos)
                .map(|m| MediaRef {
                    url: m.url,
                    duration_secs: m.duration.as_ref().and_then(parse_duration),
                })
                .collect();
            TaskStatus {
                state: TaskState::Succeeded,
                results,
                fail_reason: None,
            }
        }
        "failed" => TaskStatus {
            state: TaskState::Failed,
            results: Vec::new(),
            fail_reason: data.task_status_msg.filter(|m| !m.trim().is_empty()),
        },
        // "submitted" and "processing"
        _ => TaskStatus::pending(),
    }
}

fn parse_duration(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Map Kling's business error codes onto the provider taxonomy.
fn classify_error(status: u16, code: i64, message: String) -> ProviderError {
    match code {
        1000..=1004 => ProviderError::Auth(message),
        1301 => ProviderError::Refused {
            kind: RefusalKind::ContentBlocked,
            detail: message,
        },
        // Rate and concurrency limits clear up on their own.
        1302 | 1303 => ProviderError::Api { status: 429, body: message },
        5000..=5999 => ProviderError::Api { status: 500, body: message },
        _ => ProviderError::Api {
            status: if status >= 400 { status } else { 400 },
            body: format!("code {}: {}", code, message),
        },
    }
}
