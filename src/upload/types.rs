//! Prediction wire types
//!
//! The success body of the prediction endpoint, validated strictly: every
//! field must be present with the right type, and numeric readings must be
//! finite and non-negative.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Upload errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Service responded with {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Estimated gender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
    #[serde(other)]
    Unknown,
}

/// Quality of the extracted pulse signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    Poor,
    Fair,
    Good,
}

/// Blood pressure classification shown with the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BpCategory {
    Normal,
    Elevated,
    HypertensionStage1,
    HypertensionStage2,
}

impl BpCategory {
    /// Classify a systolic/diastolic pair (mmHg)
    pub fn classify(systolic: f64, diastolic: f64) -> Self {
        if systolic < 120.0 && diastolic < 80.0 {
            BpCategory::Normal
        } else if systolic < 130.0 && diastolic < 80.0 {
            BpCategory::Elevated
        } else if systolic < 140.0 || diastolic < 90.0 {
            BpCategory::HypertensionStage1
        } else {
            BpCategory::HypertensionStage2
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BpCategory::Normal => "Normal",
            BpCategory::Elevated => "Elevated",
            BpCategory::HypertensionStage1 => "Hypertension Stage 1",
            BpCategory::HypertensionStage2 => "Hypertension Stage 2",
        }
    }
}

/// Vital-sign estimate returned by the prediction service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Systolic pressure, mmHg
    pub systolic: f64,
    /// Diastolic pressure, mmHg
    pub diastolic: f64,
    /// Beats per minute
    pub heart_rate: f64,
    /// Estimated age in years
    pub age: f64,
    pub gender: Gender,
    pub signal_quality: SignalQuality,
    /// Identifier assigned by the backend
    #[serde(deserialize_with = "opaque_id")]
    pub session_id: String,
}

impl PredictionResult {
    /// Parse and validate a response body
    pub fn from_json(body: &[u8]) -> UploadResult<Self> {
        let result: PredictionResult =
            serde_json::from_slice(body).map_err(|e| UploadError::Decode(e.to_string()))?;
        result.validate()?;
        Ok(result)
    }

    /// Reject readings no model could have produced
    pub fn validate(&self) -> UploadResult<()> {
        let readings = [
            ("systolic", self.systolic),
            ("diastolic", self.diastolic),
            ("heart_rate", self.heart_rate),
            ("age", self.age),
        ];
        for (name, value) in readings {
            if !value.is_finite() || value < 0.0 {
                return Err(UploadError::Decode(format!("{name} out of range: {value}")));
            }
        }
        if self.session_id.is_empty() {
            return Err(UploadError::Decode("empty session_id".to_string()));
        }
        Ok(())
    }

    pub fn bp_category(&self) -> BpCategory {
        BpCategory::classify(self.systolic, self.diastolic)
    }
}

/// Accept the backend's session id as either a string or an integer
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

/// Body of a non-success response
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
}
