//! Upstream calendar access.
//!
//! One call issues exactly one HTTP request; retries and caching live in
//! [`super::retry::CachedCalendar`].

use super::domain::{format_upstream_date, DistrictId};
use crate::config::UpstreamConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Failure of a single calendar request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("response for district {district} is missing the `{key}` field")]
    MissingKey {
        district: DistrictId,
        key: &'static str,
    },
    #[error("request for district {district} failed: {message}")]
    Network {
        district: DistrictId,
        message: String,
    },
    #[error("upstream returned HTTP {status} for district {district}")]
    Status { district: DistrictId, status: u16 },
    #[error("malformed response for district {district}: {message}")]
    Decode {
        district: DistrictId,
        message: String,
    },
}

impl FetchError {
    /// Missing-key responses are upstream hiccups and worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::MissingKey { .. })
    }

    pub fn district(&self) -> DistrictId {
        match self {
            FetchError::MissingKey { district, .. }
            | FetchError::Network { district, .. }
            | FetchError::Status { district, .. }
            | FetchError::Decode { district, .. } => *district,
        }
    }
}

/// Source of raw per-district calendars.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Fetch the `centers` array for one district starting at `date`.
    async fn fetch_calendar(
        &self,
        district: DistrictId,
        date: NaiveDate,
    ) -> Result<Vec<Value>, FetchError>;
}

#[async_trait]
impl<T> CalendarSource for std::sync::Arc<T>
where
    T: CalendarSource + ?Sized,
{
    async fn fetch_calendar(
        &self,
        district: DistrictId,
        date: NaiveDate,
    ) -> Result<Vec<Value>, FetchError> {
        (**self).fetch_calendar(district, date).await
    }
}

/// HTTP client for the public CoWIN API.
#[derive(Debug, Clone)]
pub struct CowinClient {
    client: reqwest::Client,
    base_url: String,
}

impl CowinClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn calendar_url(&self, district: DistrictId, date: NaiveDate) -> String {
        format!(
            "{}/appointment/sessions/public/calendarByDistrict?district_id={}&date={}",
            self.base_url,
            district,
            format_upstream_date(date)
        )
    }
}

#[async_trait]
impl CalendarSource for CowinClient {
    async fn fetch_calendar(
        &self,
        district: DistrictId,
        date: NaiveDate,
    ) -> Result<Vec<Value>, FetchError> {
        let url = self.calendar_url(district, date);
        debug!(%url, "fetching district calendar");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|err| FetchError::Network {
                district,
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                district,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|err| FetchError::Network {
            district,
            message: err.to_string(),
        })?;

        let payload: Value = serde_json::from_slice(&body).map_err(|err| FetchError::Decode {
            district,
            message: err.to_string(),
        })?;

        extract_centers(district, payload)
    }
}

/// Pull the `centers` array out of a parsed calendar payload.
pub(crate) fn extract_centers(district: DistrictId, payload: Value) -> Result<Vec<Value>, FetchError> {
    let Value::Object(mut fields) = payload else {
        return Err(FetchError::Decode {
            district,
            message: "expected a JSON object at the top level".to_string(),
        });
    };

    match fields.remove("centers") {
        Some(Value::Array(centers)) => Ok(centers),
        Some(other) => Err(FetchError::Decode {
            district,
            message: format!("`centers` should be an array, found {}", json_kind(&other)),
        }),
        None => Err(FetchError::MissingKey {
            district,
            key: "centers",
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
