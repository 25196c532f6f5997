use std::time::Duration;

use serde::Deserialize;

use crate::services::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prometheus listener for the worker process
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the scheduled-run queue
    pub redis_url: String,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Public base URL objects are served from
    pub r2_public_url: String,

    /// Provider key for try-on image jobs ("gemini" or "kling")
    #[serde(default = "default_tryon_provider")]
    pub tryon_provider: String,

    /// Provider key for video jobs
    #[serde(default = "default_video_provider")]
    pub video_provider: String,

    pub kling_access_key: Option<String>,

    pub kling_secret_key: Option<String>,

    #[serde(default = "default_kling_base_url")]
    pub kling_base_url: String,

    pub gemini_api_key: Option<String>,

    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,

    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    /// Provider submission attempts per job
    #[serde(default = "default_submit_attempts")]
    pub submit_attempts: i32,

    /// Status checks per asynchronous task
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: i32,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_initial_poll_delay_secs")]
    pub initial_poll_delay_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_tryon_provider() -> String {
    "gemini".to_string()
}

fn default_video_provider() -> String {
    "kling".to_string()
}

fn default_kling_base_url() -> String {
    "https://api-singapore.klingai.com".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash-image-preview".to_string()
}

fn default_submit_attempts() -> i32 {
    3
}

fn default_poll_attempts() -> i32 {
    30
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_initial_poll_delay_secs() -> u64 {
    5
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            submit_attempts: self.submit_attempts.max(1),
            poll_attempts: self.poll_attempts.max(1),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            initial_poll_delay: Duration::from_secs(self.initial_poll_delay_secs),
            ..RetryPolicy::default()
        }
    }
}
