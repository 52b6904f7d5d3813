//! Prediction upload
//!
//! - PredictionService trait and its HTTP implementation
//! - UploadCoordinator owning the single in-flight submission
//! - Strictly validated response types

pub mod client;
pub mod coordinator;
pub mod types;

pub use client::{HttpPredictionClient, PredictionService, GENERIC_SERVICE_ERROR};
pub use coordinator::UploadCoordinator;
pub use types::{BpCategory, Gender, PredictionResult, SignalQuality, UploadError, UploadResult};
