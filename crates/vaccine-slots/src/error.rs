use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::availability::{GeoTableError, QueryError, ScanDateOutOfRange};
use crate::workflows::districts::DistrictDirectoryError;
use crate::workflows::notify::NotificationError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Upstream(reqwest::Error),
    Districts(DistrictDirectoryError),
    Geo(GeoTableError),
    Notification(NotificationError),
    Query(QueryError),
    Export(csv::Error),
    ScanDate(ScanDateOutOfRange),
    InvalidInput(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Upstream(err) => write!(f, "upstream client error: {}", err),
            AppError::Districts(err) => write!(f, "district directory error: {}", err),
            AppError::Geo(err) => write!(f, "postal code table error: {}", err),
            AppError::Notification(err) => write!(f, "notification error: {}", err),
            AppError::Query(err) => write!(f, "invalid query: {}", err),
            AppError::Export(err) => write!(f, "export error: {}", err),
            AppError::ScanDate(err) => write!(f, "scan date error: {}", err),
            AppError::InvalidInput(message) => write!(f, "invalid input: {}", message),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Upstream(err) => Some(err),
            AppError::Districts(err) => Some(err),
            AppError::Geo(err) => Some(err),
            AppError::Notification(err) => Some(err),
            AppError::Query(err) => Some(err),
            AppError::Export(err) => Some(err),
            AppError::ScanDate(err) => Some(err),
            AppError::InvalidInput(_) => None,
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Query(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Districts(DistrictDirectoryError::UnknownDistrict(_)) => {
                StatusCode::NOT_FOUND
            }
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Upstream(_)
            | AppError::Districts(_)
            | AppError::Geo(_)
            | AppError::Notification(_)
            | AppError::Export(_)
            | AppError::ScanDate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::Upstream(value)
    }
}

impl From<DistrictDirectoryError> for AppError {
    fn from(value: DistrictDirectoryError) -> Self {
        Self::Districts(value)
    }
}

impl From<GeoTableError> for AppError {
    fn from(value: GeoTableError) -> Self {
        Self::Geo(value)
    }
}

impl From<NotificationError> for AppError {
    fn from(value: NotificationError) -> Self {
        Self::Notification(value)
    }
}

impl From<QueryError> for AppError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

impl From<csv::Error> for AppError {
    fn from(value: csv::Error) -> Self {
        Self::Export(value)
    }
}

impl From<ScanDateOutOfRange> for AppError {
    fn from(value: ScanDateOutOfRange) -> Self {
        Self::ScanDate(value)
    }
}
