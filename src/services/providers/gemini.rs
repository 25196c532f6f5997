//! Gemini image generation provider.
//!
//! Composes the figure and up to five garments in one request/response call
//! and stores the returned image before answering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    ProviderError, RefusalKind, Submission, SubmitRequest, TaskStatus, TryOnProvider,
};
use crate::models::garment::GarmentCategory;
use crate::models::job::JobKind;
use crate::services::media::image_format;
use crate::services::storage::{random_path, BlobStore};

pub const NAME: &str = "gemini";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

pub struct GeminiProvider {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
    blobs: Arc<dyn BlobStore>,
    retry_delay: Duration,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    Image { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

impl GeminiProvider {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            blobs,
            retry_delay: RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn image_part(&self, path: &str) -> Result<RequestPart, ProviderError> {
        let bytes = self.blobs.get(path).await?;
        let (_, mime) = image_format(&bytes);
        Ok(RequestPart::Image {
            inline_data: InlineData {
                mime_type: mime.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        })
    }

    async fn generate(&self, body: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl TryOnProvider for GeminiProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn is_synchronous(&self) -> bool {
        true
    }

    fn supports(&self, kind: JobKind) -> bool {
        kind == JobKind::TryOn
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, ProviderError> {
        if request.kind != JobKind::TryOn {
            return Err(ProviderError::Unsupported(format!("{} jobs", request.kind)));
        }

        let mut parts = vec![RequestPart::Text {
            text: build_prompt(request),
        }];
        parts.push(self.image_part(&request.source_image).await?);
        for garment in &request.garments {
            parts.push(self.image_part(&garment.image_path).await?);
        }

        let body = GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            },
        };

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.generate(&body).await {
                Ok(response) => break response,
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        provider = NAME,
                        attempt,
                        error = %e,
                        "Generation request failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let image = extract_image(response)?;
        let (extension, content_type) = image_format(&image);
        let path = random_path(JobKind::TryOn.result_prefix(), extension);
        self.blobs.put(&path, &image, content_type).await?;

        Ok(Submission::Sync(path))
    }

    async fn poll_status(&self, _kind: JobKind, task_id: &str) -> Result<TaskStatus, ProviderError> {
        Err(ProviderError::Unsupported(format!(
            "polling task {} on a synchronous provider",
            task_id
        )))
    }
}

fn build_prompt(request: &SubmitRequest) -> String {
    let mut prompt = String::from(
        "Dress the person in the first image in the garments shown in the following images. \
         Keep their face, body shape, pose and the background unchanged.",
    );
    for (i, garment) in request.garments.iter().enumerate() {
        let role = match garment.category {
            GarmentCategory::Upper => "an upper-body garment",
            GarmentCategory::Lower => "a lower-body garment",
            GarmentCategory::Dress => "a full-length dress",
        };
        prompt.push_str(&format!("\nImage {} is {}.", i + 2, role));
    }
    if let Some(hint) = request.style_hint.as_deref().filter(|h| !h.trim().is_empty()) {
        prompt.push_str(&format!("\nStyling: {}", hint.trim()));
    }
    if let Some(ctx) = request.measurements.as_ref().filter(|c| !c.is_empty()) {
        prompt.push_str("\nUse these measurements to get the fit right:\n");
        prompt.push_str(&ctx.describe());
    }
    prompt
}

/// Pull the first image out of a response, classifying refusals.
fn extract_image(response: GenerateResponse) -> Result<Vec<u8>, ProviderError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::Refused {
            kind: RefusalKind::ContentBlocked,
            detail: format!("prompt blocked: {}", reason),
        });
    }

    let mut finish_reason = None;
    for candidate in response.candidates {
        let data = candidate
            .content
            .into_iter()
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data)
            .filter(|d| d.mime_type.as_deref().map_or(true, |m| m.starts_with("image/")));

        if let Some(data) = data {
            return base64::engine::general_purpose::STANDARD
                .decode(data.data.as_bytes())
                .map_err(|e| ProviderError::Parse(e.to_string()));
        }
        finish_reason = finish_reason.or(candidate.finish_reason);
    }

    let reason = finish_reason.unwrap_or_else(|| "NONE".to_string());
    let kind = match reason.as_str() {
        "SAFETY" | "IMAGE_SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII" => {
            RefusalKind::ContentBlocked
        }
        _ => RefusalKind::NoImage,
    };
    Err(ProviderError::Refused {
        kind,
        detail: format!("no image returned (finish reason {})", reason),
    })
}
