//! Historical readings
//!
//! Read-only client for the readings service backing the history chart.

use crate::config::{ConfigError, ServiceConfig};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// History query errors
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("History service responded with {0}")]
    Status(u16),

    #[error("Malformed history response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Time window of a history query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryRange {
    #[serde(rename = "1day")]
    OneDay,
    #[serde(rename = "7days")]
    SevenDays,
    #[serde(rename = "1month")]
    OneMonth,
    #[serde(rename = "3months")]
    ThreeMonths,
}

impl Default for HistoryRange {
    fn default() -> Self {
        Self::SevenDays
    }
}

impl HistoryRange {
    /// Value of the `range` query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryRange::OneDay => "1day",
            HistoryRange::SevenDays => "7days",
            HistoryRange::OneMonth => "1month",
            HistoryRange::ThreeMonths => "3months",
        }
    }
}

impl fmt::Display for HistoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1day" => Ok(HistoryRange::OneDay),
            "7days" => Ok(HistoryRange::SevenDays),
            "1month" => Ok(HistoryRange::OneMonth),
            "3months" => Ok(HistoryRange::ThreeMonths),
            other => Err(format!(
                "unknown range '{other}', expected 1day, 7days, 1month or 3months"
            )),
        }
    }
}

/// One stored reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub systolic: f64,
    pub diastolic: f64,
    pub heart_rate: f64,
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339, RFC 2822 (`Fri, 01 Mar 2024 08:00:00 GMT`, as Flask
/// renders datetimes) and a naive `YYYY-MM-DD HH:MM:SS` taken as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => parse_timestamp(&text).ok_or_else(|| {
            serde::de::Error::custom(format!("unrecognized timestamp '{text}'"))
        }),
        Raw::Millis(millis) => DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp {millis} out of range"))),
    }
}

/// Client for the readings endpoint
#[derive(Debug, Clone)]
pub struct HistoryClient {
    client: Client,
    url: Url,
}

impl HistoryClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: Client::new(),
            url: config.history_url()?,
        })
    }

    /// Fetch readings within `range`, oldest first
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch(&self, range: HistoryRange) -> Result<Vec<Reading>, HistoryError> {
        let response = self
            .client
            .get(self.url.clone())
            .query(&[("range", range.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let mut readings: Vec<Reading> = serde_json::from_slice(&body)?;
        readings.sort_by_key(|reading| reading.timestamp);

        tracing::debug!("Fetched {} readings for {}", readings.len(), range);
        Ok(readings)
    }
}
