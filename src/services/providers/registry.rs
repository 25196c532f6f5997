use std::collections::HashMap;
use std::sync::Arc;

use super::gemini::GeminiProvider;
use super::kling::KlingProvider;
use super::{ProviderError, TryOnProvider};
use crate::config::AppConfig;
use crate::models::job::JobKind;
use crate::services::storage::BlobStore;

/// Providers resolved once at start-up and bound to job kinds.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn TryOnProvider>>,
    try_on: Arc<dyn TryOnProvider>,
    video: Arc<dyn TryOnProvider>,
}

impl ProviderRegistry {
    /// Bind `try_on_key` and `video_key` to registered providers.
    ///
    /// A key that names no registered provider, or one that cannot produce
    /// that kind, falls back to the first registered provider that can.
    pub fn new(
        available: Vec<Arc<dyn TryOnProvider>>,
        try_on_key: &str,
        video_key: &str,
    ) -> Result<Self, RegistryError> {
        let try_on = select(&available, try_on_key, JobKind::TryOn)?;
        let video = select(&available, video_key, JobKind::Video)?;
        let providers = available
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();

        Ok(Self {
            providers,
            try_on,
            video,
        })
    }

    /// Build every provider that has credentials configured.
    pub fn from_config(
        config: &AppConfig,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self, RegistryError> {
        let mut available: Vec<Arc<dyn TryOnProvider>> = Vec::new();

        if let (Some(access), Some(secret)) = (&config.kling_access_key, &config.kling_secret_key) {
            let provider = KlingProvider::new(&config.kling_base_url, access, secret, blobs.clone())
                .map_err(RegistryError::Init)?;
            available.push(Arc::new(provider));
        }

        if let Some(api_key) = &config.gemini_api_key {
            let provider =
                GeminiProvider::new(&config.gemini_base_url, &config.gemini_model, api_key, blobs)
                    .map_err(RegistryError::Init)?;
            available.push(Arc::new(provider));
        }

        tracing::info!(
            providers = ?available.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
            "Registered try-on providers"
        );

        Self::new(available, &config.tryon_provider, &config.video_provider)
    }

    pub fn for_kind(&self, kind: JobKind) -> Arc<dyn TryOnProvider> {
        match kind {
            JobKind::TryOn => self.try_on.clone(),
            JobKind::Video => self.video.clone(),
        }
    }

    /// Look up the provider a job was submitted to.
    pub fn get(&self, name: &str) -> Option<Arc<dyn TryOnProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn select(
    available: &[Arc<dyn TryOnProvider>],
    key: &str,
    kind: JobKind,
) -> Result<Arc<dyn TryOnProvider>, RegistryError> {
    if let Some(p) = available.iter().find(|p| p.name() == key && p.supports(kind)) {
        return Ok(p.clone());
    }

    let fallback = available
        .iter()
        .find(|p| p.supports(kind))
        .cloned()
        .ok_or(RegistryError::NoProvider(kind))?;

    tracing::warn!(
        configured = key,
        fallback = fallback.name(),
        kind = %kind,
        "Configured provider unavailable for job kind, falling back"
    );
    Ok(fallback)
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no configured provider can handle {0} jobs")]
    NoProvider(JobKind),

    #[error("provider initialisation failed: {0}")]
    Init(ProviderError),
}
