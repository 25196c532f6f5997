use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;

use crate::services::url_guard::SafeUrl;

/// Download timeout for provider-hosted media.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest artifact we are willing to buffer (video clips included).
const MAX_MEDIA_BYTES: usize = 200 * 1024 * 1024;

/// A downloaded artifact.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Fetches media from a URL that already passed the [`UrlGuard`](crate::services::url_guard::UrlGuard).
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, target: &SafeUrl) -> Result<FetchedMedia, FetchError>;
}

/// reqwest-based fetcher pinned to the guard's vetted addresses.
pub struct HttpMediaFetcher {
    timeout: Duration,
}

impl HttpMediaFetcher {
    pub fn new() -> Self {
        Self {
            timeout: DOWNLOAD_TIMEOUT,
        }
    }
}

impl Default for HttpMediaFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, target: &SafeUrl) -> Result<FetchedMedia, FetchError> {
        // Pinning the resolution means the connection goes to an address the
        // guard saw. Redirects would leave the vetted host, so they are refused.
        let client = reqwest::Client::builder()
            .resolve_to_addrs(&target.host, &target.addrs)
            .redirect(Policy::none())
            .timeout(self.timeout)
            .build()
            .map_err(FetchError::Http)?;

        let response = client
            .get(target.url.clone())
            .send()
            .await
            .map_err(FetchError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_MEDIA_BYTES {
                return Err(FetchError::TooLarge(len as usize));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let bytes = response.bytes().await.map_err(FetchError::Http)?;
        if bytes.len() > MAX_MEDIA_BYTES {
            return Err(FetchError::TooLarge(bytes.len()));
        }
        if bytes.is_empty() {
            return Err(FetchError::Empty);
        }

        Ok(FetchedMedia {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// File extension and content type for a stored image artifact.
pub fn image_format(bytes: &[u8]) -> (&'static str, &'static str) {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => ("jpg", "image/jpeg"),
        Ok(image::ImageFormat::WebP) => ("webp", "image/webp"),
        _ => ("png", "image/png"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("media request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("media host returned HTTP {0}")]
    Status(u16),

    #[error("media is too large ({0} bytes)")]
    TooLarge(usize),

    #[error("media body was empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_format_sniffing() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(image_format(&png), ("png", "image/png"));

        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];
        assert_eq!(image_format(&jpeg), ("jpg", "image/jpeg"));

        assert_eq!(image_format(b"unknown bytes"), ("png", "image/png"));
    }
}
