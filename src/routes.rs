use crate::infra::{deserialize_optional_date, parse_list, AppState, ScanContext};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use vaccine_slots::error::AppError;
use vaccine_slots::workflows::availability::{
    format_upstream_date, CalendarSource, DistrictId, FeeType, ScanOutcome, ScanReport,
    ScanRequest, SlotQuery,
};
use vaccine_slots::workflows::display::{status_message, PivotTable, SlotTable};
use vaccine_slots::workflows::districts::DistrictEntry;

#[derive(Debug, Deserialize)]
pub(crate) struct AvailabilityParams {
    /// Comma separated district ids.
    #[serde(default)]
    pub(crate) district_id: Option<String>,
    /// Comma separated district names, resolved through the directory.
    #[serde(default)]
    pub(crate) district: Option<String>,
    #[serde(default)]
    pub(crate) age: Option<u32>,
    #[serde(default)]
    pub(crate) pincode: Option<String>,
    /// Comma separated fee types; all fee types when absent.
    #[serde(default)]
    pub(crate) fee: Option<String>,
    #[serde(default)]
    pub(crate) show_empty: bool,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub(crate) date: Option<NaiveDate>,
    #[serde(default)]
    pub(crate) pivot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum AvailabilityStatus {
    Found,
    Empty,
    Unavailable,
}

#[derive(Debug, Serialize)]
pub(crate) struct FailureView {
    pub(crate) district_id: DistrictId,
    pub(crate) error: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AvailabilityResponse {
    pub(crate) date: String,
    pub(crate) districts: Vec<DistrictId>,
    pub(crate) status: AvailabilityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
    pub(crate) distance_ranked: bool,
    pub(crate) table: SlotTable,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) pivot: Option<PivotTable>,
    pub(crate) failures: Vec<FailureView>,
}

impl AvailabilityResponse {
    fn from_report(report: &ScanReport, pivot: bool) -> Self {
        let status = match report.outcome {
            ScanOutcome::Found(_) => AvailabilityStatus::Found,
            ScanOutcome::Empty => AvailabilityStatus::Empty,
            ScanOutcome::Unavailable => AvailabilityStatus::Unavailable,
        };

        Self {
            date: format_upstream_date(report.date),
            districts: report.districts.clone(),
            status,
            message: status_message(report),
            distance_ranked: report.geo_ranked,
            table: SlotTable::from_report(report),
            pivot: pivot.then(|| PivotTable::from_rows(report.rows())),
            failures: report
                .failures
                .iter()
                .map(|failure| FailureView {
                    district_id: failure.district,
                    error: failure.error.to_string(),
                })
                .collect(),
        }
    }
}

/// Availability endpoints bound to one shared scan context.
pub(crate) fn availability_router<S>(context: Arc<ScanContext<S>>) -> Router
where
    S: CalendarSource + 'static,
{
    Router::new()
        .route("/api/v1/availability", get(availability_endpoint::<S>))
        .route("/api/v1/availability.csv", get(availability_csv_endpoint::<S>))
        .route("/api/v1/districts", get(districts_endpoint::<S>))
        .with_state(context)
}

pub(crate) fn with_service_routes<S>(context: Arc<ScanContext<S>>) -> Router
where
    S: CalendarSource + 'static,
{
    availability_router(context)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn run_scan<S>(
    context: &ScanContext<S>,
    params: &AvailabilityParams,
) -> Result<ScanReport, AppError>
where
    S: CalendarSource,
{
    let ids: Vec<DistrictId> = parse_list(params.district_id.as_deref(), "district_id")?;
    let names: Vec<String> = parse_list(params.district.as_deref(), "district")?;
    let districts = context.resolve_districts(&ids, &names)?;

    let age = params
        .age
        .ok_or_else(|| AppError::InvalidInput("age is required".to_string()))?;
    let fees: Vec<FeeType> = parse_list(params.fee.as_deref(), "fee")?;
    let mut query = SlotQuery::new(age).showing_empty(params.show_empty);
    if !fees.is_empty() {
        query = query.with_fee_types(fees);
    }

    let request = ScanRequest {
        districts,
        date: context.date_or_default(params.date)?,
        query,
        search_pincode: params
            .pincode
            .as_deref()
            .map(str::trim)
            .filter(|pincode| !pincode.is_empty())
            .map(str::to_string),
    };

    Ok(context.scanner.scan(&request).await?)
}

pub(crate) async fn availability_endpoint<S>(
    State(context): State<Arc<ScanContext<S>>>,
    params: Result<Query<AvailabilityParams>, QueryRejection>,
) -> Result<Json<AvailabilityResponse>, AppError>
where
    S: CalendarSource + 'static,
{
    let Query(params) = params.map_err(|rejection| AppError::InvalidInput(rejection.body_text()))?;
    let report = run_scan(&context, &params).await?;
    Ok(Json(AvailabilityResponse::from_report(&report, params.pivot)))
}

/// Pivoted capacity per center and date as a CSV download.
pub(crate) async fn availability_csv_endpoint<S>(
    State(context): State<Arc<ScanContext<S>>>,
    params: Result<Query<AvailabilityParams>, QueryRejection>,
) -> Result<impl IntoResponse, AppError>
where
    S: CalendarSource + 'static,
{
    let Query(params) = params.map_err(|rejection| AppError::InvalidInput(rejection.body_text()))?;
    let report = run_scan(&context, &params).await?;
    let csv = PivotTable::from_rows(report.rows()).to_csv_string()?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"availability.csv\"",
            ),
        ],
        csv,
    ))
}

pub(crate) async fn districts_endpoint<S>(
    State(context): State<Arc<ScanContext<S>>>,
) -> Json<Vec<DistrictEntry>>
where
    S: CalendarSource + 'static,
{
    Json(context.directory.entries().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;
    use vaccine_slots::workflows::availability::{
        AvailabilityScanner, CachedCalendar, FetchError, RetryPolicy, TtlCache,
    };
    use vaccine_slots::workflows::districts::DistrictDirectory;

    struct FixtureSource;

    #[async_trait]
    impl CalendarSource for FixtureSource {
        async fn fetch_calendar(
            &self,
            district: DistrictId,
            _date: NaiveDate,
        ) -> Result<Vec<Value>, FetchError> {
            match district.get() {
                154 => Ok(vec![
                    center(1, "Bopal PHC", "380058", 45, 10, "Free"),
                    center(2, "Shalby Hospital", "380054", 18, 25, "Paid"),
                ]),
                _ => Err(FetchError::Network {
                    district,
                    message: "connection refused".to_string(),
                }),
            }
        }
    }

    fn center(id: u64, name: &str, pincode: &str, age: u32, capacity: u32, fee: &str) -> Value {
        json!({
            "center_id": id,
            "name": name,
            "address": "Ring Road",
            "state_name": "Gujarat",
            "district_name": "Ahmedabad",
            "block_name": "City",
            "pincode": pincode.parse::<u64>().unwrap(),
            "fee_type": fee,
            "sessions": [
                { "date": "04-05-2021", "min_age_limit": age, "available_capacity": capacity, "vaccine": "COVISHIELD" },
                { "date": "05-05-2021", "min_age_limit": age, "available_capacity": 3, "vaccine": "COVISHIELD" }
            ]
        })
    }

    fn router() -> Router {
        let calendar = CachedCalendar::new(
            FixtureSource,
            RetryPolicy::new(1, Duration::ZERO),
            TtlCache::new(Duration::from_secs(600), 16),
        );
        let directory =
            DistrictDirectory::from_reader("district_name,district_id\nAhmedabad,154\n".as_bytes())
                .expect("directory parses");
        let context = Arc::new(ScanContext {
            scanner: AvailabilityScanner::new(calendar),
            directory,
            lookahead_days: 1,
        });
        availability_router(context)
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let response = router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .expect("route executes");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        (status, serde_json::from_slice(&body).expect("json payload"))
    }

    #[tokio::test]
    async fn availability_filters_by_age_and_orders_by_capacity() {
        let (status, body) =
            get_json("/api/v1/availability?district_id=154&age=40&date=04-05-2021").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "found");
        let rows = body["table"]["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Center"], "Shalby Hospital");
        assert_eq!(rows[0]["Available"], 25);
        assert_eq!(rows[1]["Available"], 3);
        assert!(body.get("pivot").is_none());
    }

    #[tokio::test]
    async fn availability_resolves_names_and_fee_filters() {
        let (status, body) = get_json(
            "/api/v1/availability?district=Ahmedabad&age=60&fee=Free&pivot=true&date=04-05-2021",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let rows = body["table"]["rows"].as_array().unwrap();
        assert!(rows.iter().all(|row| row["Fee Type"] == "Free"));
        assert_eq!(body["pivot"]["rows"][0]["capacities"], json!([10, 3]));
    }

    #[tokio::test]
    async fn all_districts_failing_is_reported_not_raised() {
        let (status, body) =
            get_json("/api/v1/availability?district_id=999&age=45&date=04-05-2021").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "unavailable");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("Could not fetch availability data"));
        assert_eq!(body["failures"][0]["district_id"], 999);
        assert!(body["table"]["rows"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_district_name_is_not_found() {
        let (status, body) = get_json("/api/v1/availability?district=Atlantis&age=45").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("Atlantis"));
    }

    #[tokio::test]
    async fn invalid_fee_is_bad_request() {
        let (status, _) = get_json("/api/v1/availability?district_id=154&age=45&fee=Gratis").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_age_is_a_json_bad_request() {
        let (status, body) = get_json("/api/v1/availability?district_id=154").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("age is required"));
    }

    #[tokio::test]
    async fn malformed_query_is_a_json_bad_request() {
        let (status, body) =
            get_json("/api/v1/availability?district_id=154&age=old&date=2021-05-04").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("invalid input"));
    }

    #[tokio::test]
    async fn csv_download_contains_pivot() {
        let response = router()
            .oneshot(
                Request::get("/api/v1/availability.csv?district_id=154&age=45&date=04-05-2021")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("route executes");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(
            text,
            "Center,Pincode,04-05-2021,05-05-2021\nShalby Hospital,380054,25,3\nBopal PHC,380058,10,3\n"
        );
    }

    #[tokio::test]
    async fn districts_listing_returns_directory() {
        let (status, body) = get_json("/api/v1/districts").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{ "district_name": "Ahmedabad", "district_id": 154 }]));
    }
}
