//! In-memory stand-ins for the pipeline's collaborators.
//!
//! The job store mirrors the conditional updates of the SQL queries so the
//! pipeline sees the same state transitions it would against PostgreSQL.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use tryon_pipeline::{
    db::{JobStore, StoreError, SubmissionSlot},
    models::job::{JobKind, JobStatus, TryJob},
    services::{
        media::{FetchError, FetchedMedia, MediaFetcher},
        pipeline::TryOnPipeline,
        providers::{
            ProviderError, ProviderRegistry, Submission, SubmitRequest, TaskStatus, TryOnProvider,
        },
        queue::{JobStage, QueueError, QueuedJob, Scheduler},
        retry::RetryPolicy,
        storage::{BlobStore, StorageError},
        url_guard::{Resolver, SafeUrl, UrlGuard},
    },
};

pub const PUBLIC_MEDIA_HOST: &str = "media.provider.test";
pub const PRIVATE_MEDIA_HOST: &str = "internal.provider.test";

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, TryJob>>,
}

impl InMemoryJobStore {
    pub async fn insert(&self, job: TryJob) {
        self.jobs.lock().await.insert(job.id, job);
    }

    pub async fn snapshot(&self, job_id: Uuid) -> TryJob {
        self.jobs
            .lock()
            .await
            .get(&job_id)
            .cloned()
            .expect("job not in store")
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get_job(&self, job_id: Uuid) -> Result<Option<TryJob>, StoreError> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }

    async fn begin_submission(
        &self,
        job_id: Uuid,
        provider: &str,
    ) -> Result<Option<SubmissionSlot>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.is_terminal() || job.provider_task_id.is_some() {
            return Ok(None);
        }

        job.status = JobStatus::Processing;
        job.attempts += 1;
        let bound = job.provider.get_or_insert_with(|| provider.to_string()).clone();
        Ok(Some(SubmissionSlot {
            attempt: job.attempts,
            provider: bound,
        }))
    }

    async fn attach_task(&self, job_id: Uuid, task_id: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status == JobStatus::Processing {
                job.provider_task_id = Some(task_id.to_string());
                job.attempts = 0;
            }
        }
        Ok(())
    }

    async fn record_poll_attempt(&self, job_id: Uuid) -> Result<Option<i32>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.awaiting_task() => {
                job.attempts += 1;
                Ok(Some(job.attempts))
            }
            _ => Ok(None),
        }
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        result_path: &str,
        duration_secs: Option<f64>,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&job_id) {
            Some(job) if !job.is_terminal() => {
                job.status = JobStatus::Completed;
                job.result_path = Some(result_path.to_string());
                job.duration_secs = duration_secs;
                job.error = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&job_id) {
            Some(job) if !job.is_terminal() => {
                job.status = JobStatus::Failed;
                job.error = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Blob store kept in a map. `fail_next_puts`/`fail_next_gets` make the next
/// calls answer like an unavailable bucket.
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    failing_puts: Mutex<usize>,
    failing_gets: Mutex<usize>,
}

impl InMemoryBlobStore {
    pub async fn fail_next_puts(&self, count: usize) {
        *self.failing_puts.lock().await = count;
    }

    pub async fn fail_next_gets(&self, count: usize) {
        *self.failing_gets.lock().await = count;
    }

    async fn take_failure(counter: &Mutex<usize>) -> Result<(), StorageError> {
        let mut remaining = counter.lock().await;
        if *remaining > 0 {
            *remaining -= 1;
            return Err(StorageError::Status(503));
        }
        Ok(())
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub async fn content_type(&self, path: &str) -> Option<String> {
        self.objects.lock().await.get(path).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<String, StorageError> {
        Self::take_failure(&self.failing_puts).await?;
        self.objects
            .lock()
            .await
            .insert(path.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(self.url(path))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        Self::take_failure(&self.failing_gets).await?;
        self.objects
            .lock()
            .await
            .get(path)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.objects.lock().await.remove(path);
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("https://blobs.test/{}", path)
    }
}

/// Records every scheduled run instead of delivering it.
#[derive(Default)]
pub struct RecordingScheduler {
    runs: Mutex<Vec<(QueuedJob, Duration)>>,
}

impl RecordingScheduler {
    pub async fn runs(&self) -> Vec<(QueuedJob, Duration)> {
        self.runs.lock().await.clone()
    }

    pub async fn count(&self, stage: JobStage) -> usize {
        self.runs
            .lock()
            .await
            .iter()
            .filter(|(job, _)| job.stage == stage)
            .count()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn enqueue(&self, job: &QueuedJob, run_after: Duration) -> Result<(), QueueError> {
        self.runs.lock().await.push((job.clone(), run_after));
        Ok(())
    }
}

/// Provider whose answers are queued up front by the test.
///
/// An exhausted submit script fails with a transport error; an exhausted
/// poll script keeps reporting the task as pending. Once given a blob store
/// with `reading_source_from`, each submission first loads the model photo
/// the way the real providers do.
pub struct ScriptedProvider {
    name: &'static str,
    synchronous: bool,
    source_blobs: std::sync::OnceLock<Arc<dyn BlobStore>>,
    submissions: Mutex<VecDeque<Result<Submission, ProviderError>>>,
    statuses: Mutex<VecDeque<Result<TaskStatus, ProviderError>>>,
    requests: Mutex<Vec<SubmitRequest>>,
    polls: Mutex<Vec<(JobKind, String)>>,
}

impl ScriptedProvider {
    pub fn synchronous(name: &'static str) -> Self {
        Self::build(name, true)
    }

    pub fn asynchronous(name: &'static str) -> Self {
        Self::build(name, false)
    }

    fn build(name: &'static str, synchronous: bool) -> Self {
        Self {
            name,
            synchronous,
            source_blobs: std::sync::OnceLock::new(),
            submissions: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            polls: Mutex::new(Vec::new()),
        }
    }

    pub fn reading_source_from(&self, blobs: Arc<dyn BlobStore>) {
        let _ = self.source_blobs.set(blobs);
    }

    pub async fn on_submit(&self, result: Result<Submission, ProviderError>) {
        self.submissions.lock().await.push_back(result);
    }

    pub async fn on_poll(&self, result: Result<TaskStatus, ProviderError>) {
        self.statuses.lock().await.push_back(result);
    }

    pub async fn requests(&self) -> Vec<SubmitRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn poll_count(&self) -> usize {
        self.polls.lock().await.len()
    }
}

#[async_trait]
impl TryOnProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    fn supports(&self, _kind: JobKind) -> bool {
        true
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, ProviderError> {
        self.requests.lock().await.push(request.clone());
        if let Some(blobs) = self.source_blobs.get() {
            blobs.get(&request.source_image).await?;
        }
        self.submissions
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Request("submit script exhausted".to_string())))
    }

    async fn poll_status(&self, kind: JobKind, task_id: &str) -> Result<TaskStatus, ProviderError> {
        self.polls.lock().await.push((kind, task_id.to_string()));
        self.statuses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(TaskStatus::pending()))
    }
}

/// Resolves hosts from a fixed table. Unknown hosts fail to resolve.
pub struct StaticResolver {
    table: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn standard() -> Self {
        let mut table = HashMap::new();
        table.insert(
            PUBLIC_MEDIA_HOST.to_string(),
            vec!["93.184.216.34".parse().unwrap()],
        );
        table.insert(
            PRIVATE_MEDIA_HOST.to_string(),
            vec!["10.0.0.5".parse().unwrap()],
        );
        Self { table }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        self.table.get(host).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no record for {}", host))
        })
    }
}

/// Serves the same body for every vetted URL and records which hosts were hit.
pub struct FakeFetcher {
    body: Vec<u8>,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn serving(body: Vec<u8>) -> Self {
        Self {
            body,
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub async fn fetched(&self) -> Vec<String> {
        self.fetched.lock().await.clone()
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, target: &SafeUrl) -> Result<FetchedMedia, FetchError> {
        self.fetched.lock().await.push(target.host.clone());
        if self.body.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(FetchedMedia {
            bytes: self.body.clone(),
            content_type: None,
        })
    }
}

/// A pipeline wired to in-memory collaborators, with handles kept for assertions.
pub struct Harness {
    pub pipeline: TryOnPipeline,
    pub store: Arc<InMemoryJobStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub scheduler: Arc<RecordingScheduler>,
    pub provider: Arc<ScriptedProvider>,
    pub fetcher: Arc<FakeFetcher>,
}

impl Harness {
    pub fn new(provider: ScriptedProvider, policy: RetryPolicy) -> Self {
        Self::with_body(provider, policy, crate::fixtures::png_bytes())
    }

    pub fn with_body(provider: ScriptedProvider, policy: RetryPolicy, body: Vec<u8>) -> Self {
        let provider = Arc::new(provider);
        let store = Arc::new(InMemoryJobStore::default());
        let blobs = Arc::new(InMemoryBlobStore::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let fetcher = Arc::new(FakeFetcher::serving(body));

        let name = provider.name().to_string();
        let registry = ProviderRegistry::new(
            vec![provider.clone() as Arc<dyn TryOnProvider>],
            &name,
            &name,
        )
        .expect("registry");

        let pipeline = TryOnPipeline::new(
            store.clone(),
            blobs.clone(),
            scheduler.clone(),
            Arc::new(registry),
            UrlGuard::new(Arc::new(StaticResolver::standard())),
            fetcher.clone(),
            policy,
        );

        Self {
            pipeline,
            store,
            blobs,
            scheduler,
            provider,
            fetcher,
        }
    }

    pub async fn submit(&self, job_id: Uuid) -> Result<(), tryon_pipeline::services::pipeline::TryJobError> {
        self.pipeline
            .run(&QueuedJob {
                job_id,
                stage: JobStage::Submit,
            })
            .await
    }

    pub async fn poll(&self, job_id: Uuid) -> Result<(), tryon_pipeline::services::pipeline::TryJobError> {
        self.pipeline
            .run(&QueuedJob {
                job_id,
                stage: JobStage::Poll,
            })
            .await
    }
}

/// Policy with the default budgets and no waiting.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        submit_retry_delay: Duration::ZERO,
        ..RetryPolicy::default()
    }
}
