use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

/// Blob storage for garment photos and generated media.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `data` at `path` and return its public URL.
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<String, StorageError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Public URL for an object without touching the store.
    fn url(&self, path: &str) -> String;
}

/// Fresh randomly named object path under a logical bucket.
pub fn random_path(prefix: &str, extension: &str) -> String {
    format!("{}/{}.{}", prefix, Uuid::new_v4(), extension)
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
    public_url: String,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_url: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for R2Client {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<String, StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(path, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        check_status(path, response.status_code())?;
        Ok(self.url(path))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(path).await.map_err(StorageError::S3)?;
        check_status(path, response.status_code())?;
        Ok(response.to_vec())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let response = self.bucket.delete_object(path).await.map_err(StorageError::S3)?;
        match check_status(path, response.status_code()) {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.public_url, path.trim_start_matches('/'))
    }
}

/// rust-s3 hands back error responses as data, so every call checks the code.
fn check_status(path: &str, status: u16) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(path.to_string())),
        other => Err(StorageError::Status(other)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage returned HTTP {0}")]
    Status(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
