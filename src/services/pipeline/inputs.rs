//! Turning a stored job into a provider request.

use garde::Validate;

use super::{TryJobError, TryOnPipeline};
use crate::models::garment::{recorded, BodyMeasurements, Garment, GarmentSizing};
use crate::models::job::{JobKind, JobStatus, SourceImage, TryJob};
use crate::services::providers::{GarmentMeasurement, MeasurementContext, SubmitRequest};

pub const MAX_GARMENTS: usize = 5;

#[derive(Debug, Validate)]
struct TryOnGarments {
    #[garde(length(min = 1, max = 5))]
    garments: Vec<Garment>,
}

/// Pick the garment set for a job.
///
/// The multi-garment association wins whenever it has entries. The legacy
/// single reference is only used when the association is empty; the two are
/// never merged.
pub fn resolve_garments(linked: &[Garment], legacy: Option<&Garment>) -> Vec<Garment> {
    if !linked.is_empty() {
        return linked.to_vec();
    }
    legacy.cloned().into_iter().collect()
}

/// Sizing context for the provider, or `None` when nothing was measured.
///
/// Unfilled (absent, zero or negative) readings are dropped so they never
/// show up in a prompt.
pub fn build_measurement_context(
    body: Option<&BodyMeasurements>,
    garments: &[Garment],
) -> Option<MeasurementContext> {
    let body = body
        .map(|b| BodyMeasurements {
            height_cm: recorded(b.height_cm),
            chest_cm: recorded(b.chest_cm),
            waist_cm: recorded(b.waist_cm),
            hips_cm: recorded(b.hips_cm),
            inseam_cm: recorded(b.inseam_cm),
            shoulder_cm: recorded(b.shoulder_cm),
        })
        .filter(|b| !b.is_empty());

    let garments: Vec<GarmentMeasurement> = garments
        .iter()
        .enumerate()
        .map(|(index, g)| GarmentMeasurement {
            index,
            sizing: GarmentSizing {
                size_label: g
                    .sizing
                    .size_label
                    .as_deref()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
                chest_cm: recorded(g.sizing.chest_cm),
                waist_cm: recorded(g.sizing.waist_cm),
                hips_cm: recorded(g.sizing.hips_cm),
                length_cm: recorded(g.sizing.length_cm),
                sleeve_cm: recorded(g.sizing.sleeve_cm),
            },
        })
        .filter(|g| !g.sizing.is_empty())
        .collect();

    let context = MeasurementContext { body, garments };
    (!context.is_empty()).then_some(context)
}

impl TryOnPipeline {
    /// Blob path of the figure to dress: the user's photo, or a completed
    /// earlier job's result when chaining.
    pub(crate) async fn resolve_source(&self, job: &TryJob) -> Result<String, TryJobError> {
        match &job.source {
            SourceImage::ModelPhoto { path } => Ok(path.clone()),
            SourceImage::PriorJob { job_id } => {
                let prior = self.store.get_job(*job_id).await?.ok_or_else(|| {
                    TryJobError::InvalidInput(format!("source job {} does not exist", job_id))
                })?;

                if prior.user_id != job.user_id {
                    return Err(TryJobError::InvalidInput(format!(
                        "source job {} belongs to another user",
                        job_id
                    )));
                }

                match (prior.status, prior.result_path) {
                    (JobStatus::Completed, Some(path)) => Ok(path),
                    (status, _) => Err(TryJobError::InvalidInput(format!(
                        "source job {} is {} rather than completed",
                        job_id, status
                    ))),
                }
            }
        }
    }

    pub(crate) async fn build_request(&self, job: &TryJob) -> Result<SubmitRequest, TryJobError> {
        let source_image = self.resolve_source(job).await?;
        let garments = resolve_garments(&job.garments, job.legacy_garment.as_ref());

        let garments = match job.kind {
            JobKind::TryOn => {
                let set = TryOnGarments { garments };
                set.validate()
                    .map_err(|e| TryJobError::InvalidInput(format!("garments: {}", e)))?;
                set.garments
            }
            // Video garments are optional context for the prompt.
            JobKind::Video if garments.len() > MAX_GARMENTS => {
                return Err(TryJobError::InvalidInput(format!(
                    "{} garments exceeds the limit of {}",
                    garments.len(),
                    MAX_GARMENTS
                )))
            }
            JobKind::Video => garments,
        };

        let measurements = build_measurement_context(job.body_measurements.as_ref(), &garments);

        Ok(SubmitRequest {
            kind: job.kind,
            source_image,
            garments,
            style_hint: job
                .style_hint
                .as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string),
            measurements,
        })
    }
}
