//! Job and garment builders for pipeline tests

#![allow(dead_code)]

use chrono::Utc;
use uuid::Uuid;

use tryon_pipeline::models::{
    garment::{BodyMeasurements, Garment, GarmentCategory, GarmentSizing},
    job::{JobKind, JobStatus, SourceImage, TryJob},
};

pub fn garment(path: &str, category: GarmentCategory) -> Garment {
    Garment {
        id: Uuid::new_v4(),
        image_path: path.to_string(),
        category,
        sizing: GarmentSizing::default(),
    }
}

pub fn shirt() -> Garment {
    garment("garments/shirt.png", GarmentCategory::Upper)
}

pub fn jeans() -> Garment {
    garment("garments/jeans.png", GarmentCategory::Lower)
}

/// Smallest byte string the image sniffer recognises as PNG.
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0u8; 24]);
    bytes
}

/// Builder over [`TryJob`] starting from a pending single-garment try-on.
pub struct JobBuilder {
    job: TryJob,
}

impl JobBuilder {
    pub fn try_on() -> Self {
        let now = Utc::now();
        Self {
            job: TryJob {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                kind: JobKind::TryOn,
                status: JobStatus::Pending,
                source: SourceImage::ModelPhoto {
                    path: "models/user.jpg".to_string(),
                },
                garments: vec![shirt()],
                legacy_garment: None,
                style_hint: None,
                body_measurements: None,
                provider: None,
                provider_task_id: None,
                attempts: 0,
                result_path: None,
                duration_secs: None,
                error: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn video() -> Self {
        let mut builder = Self::try_on();
        builder.job.kind = JobKind::Video;
        builder.job.garments = Vec::new();
        builder
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.job.user_id = user_id;
        self
    }

    pub fn garments(mut self, garments: Vec<Garment>) -> Self {
        self.job.garments = garments;
        self
    }

    pub fn legacy_garment(mut self, garment: Garment) -> Self {
        self.job.legacy_garment = Some(garment);
        self
    }

    pub fn chained_from(mut self, prior: Uuid) -> Self {
        self.job.source = SourceImage::PriorJob { job_id: prior };
        self
    }

    pub fn style_hint(mut self, hint: &str) -> Self {
        self.job.style_hint = Some(hint.to_string());
        self
    }

    pub fn measurements(mut self, body: BodyMeasurements) -> Self {
        self.job.body_measurements = Some(body);
        self
    }

    /// Job whose asynchronous task was accepted and not yet checked.
    pub fn awaiting(mut self, provider: &str, task_id: &str) -> Self {
        self.job.status = JobStatus::Processing;
        self.job.provider = Some(provider.to_string());
        self.job.provider_task_id = Some(task_id.to_string());
        self.job.attempts = 0;
        self
    }

    pub fn completed(mut self, result_path: &str) -> Self {
        self.job.status = JobStatus::Completed;
        self.job.result_path = Some(result_path.to_string());
        self
    }

    pub fn failed(mut self, error: &str) -> Self {
        self.job.status = JobStatus::Failed;
        self.job.error = Some(error.to_string());
        self
    }

    pub fn build(self) -> TryJob {
        self.job
    }
}
