use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Garment categories understood by the try-on providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GarmentCategory {
    Upper,
    Lower,
    Dress,
}

/// A wardrobe item referenced by a try-on job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Garment {
    pub id: Uuid,
    /// Blob storage path of the garment photo.
    pub image_path: String,
    pub category: GarmentCategory,
    #[serde(default)]
    pub sizing: GarmentSizing,
}

/// User body measurements, all in centimetres.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BodyMeasurements {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height_cm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chest_cm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waist_cm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hips_cm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inseam_cm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shoulder_cm: Option<f64>,
}

impl BodyMeasurements {
    pub fn is_empty(&self) -> bool {
        [
            self.height_cm,
            self.chest_cm,
            self.waist_cm,
            self.hips_cm,
            self.inseam_cm,
            self.shoulder_cm,
        ]
        .iter()
        .all(|m| recorded(*m).is_none())
    }
}

/// Flat garment measurements from the size chart, in centimetres.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GarmentSizing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chest_cm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waist_cm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hips_cm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_cm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleeve_cm: Option<f64>,
}

impl GarmentSizing {
    pub fn is_empty(&self) -> bool {
        let label_missing = self
            .size_label
            .as_deref()
            .map_or(true, |l| l.trim().is_empty());
        label_missing
            && [
                self.chest_cm,
                self.waist_cm,
                self.hips_cm,
                self.length_cm,
                self.sleeve_cm,
            ]
            .iter()
            .all(|m| recorded(*m).is_none())
    }
}

/// A zero or negative reading is an unfilled form field, not a measurement.
pub(crate) fn recorded(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}
