//! Prediction service client
//!
//! Sends the finalized recording as a multipart form with a single file
//! field and maps the response into a [`PredictionResult`] or an
//! [`UploadError`].

use super::types::{ErrorBody, PredictionResult, UploadError, UploadResult};
use crate::config::ServiceConfig;
use crate::recorder::FinalPayload;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use std::time::Duration;

/// Message used when a failed response carries no readable error
pub const GENERIC_SERVICE_ERROR: &str = "Failed to get prediction";

/// Something that turns a recording into a prediction
#[async_trait]
pub trait PredictionService: Send + Sync {
    /// Submit one payload. Never retried by the caller.
    async fn submit(&self, payload: &FinalPayload) -> UploadResult<PredictionResult>;
}

/// HTTP client for the prediction backend
#[derive(Debug, Clone)]
pub struct HttpPredictionClient {
    client: Client,
    predict_url: Url,
    health_url: Url,
    field_name: String,
    file_name: String,
    timeout: Option<Duration>,
}

impl HttpPredictionClient {
    /// Build a client from the service configuration
    pub fn new(config: &ServiceConfig) -> Result<Self, crate::config::ConfigError> {
        Ok(Self {
            client: Client::new(),
            predict_url: config.predict_url()?,
            health_url: config.health_url()?,
            field_name: config.upload_field.clone(),
            file_name: config.file_name.clone(),
            timeout: config.upload_timeout(),
        })
    }

    /// Ask the backend whether it is ready to serve predictions
    #[tracing::instrument(skip(self), fields(url = %self.health_url))]
    pub async fn health(&self) -> UploadResult<bool> {
        #[derive(serde::Deserialize)]
        struct Health {
            status: String,
        }

        let response = self
            .client
            .get(self.health_url.clone())
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let health: Health = response
            .json()
            .await
            .map_err(|e| UploadError::Decode(e.to_string()))?;
        Ok(health.status == "healthy")
    }
}

#[async_trait]
impl PredictionService for HttpPredictionClient {
    #[tracing::instrument(skip(self, payload), fields(url = %self.predict_url, bytes = payload.len()))]
    async fn submit(&self, payload: &FinalPayload) -> UploadResult<PredictionResult> {
        let part = Part::stream_with_length(payload.data().clone(), payload.len() as u64)
            .file_name(self.file_name.clone())
            .mime_str(payload.mime_type())
            .map_err(|e| {
                UploadError::Decode(format!(
                    "invalid payload type '{}': {e}",
                    payload.mime_type()
                ))
            })?;
        let form = Form::new().part(self.field_name.clone(), part);

        let mut request = self.client.post(self.predict_url.clone()).multipart(form);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .map(|body| body.error)
                .unwrap_or_else(|_| GENERIC_SERVICE_ERROR.to_string());
            tracing::warn!("Prediction request failed with {}: {}", status, message);
            return Err(UploadError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let result = PredictionResult::from_json(&body)?;
        tracing::info!(
            "Prediction received: {:.0}/{:.0} mmHg, {:.0} bpm (session {})",
            result.systolic,
            result.diastolic,
            result.heart_rate,
            result.session_id
        );
        Ok(result)
    }
}
