use super::cache::{Clock, SystemClock};
use super::domain::{DistrictId, ResultSet, SlotRow};
use super::fetcher::{CalendarSource, FetchError};
use super::geo::{GeoRanker, PostalGeocoder};
use super::normalizer::{normalize_centers, NormalizeError};
use super::query::{self, QueryError, SlotQuery};
use super::retry::CachedCalendar;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One scan: a set of districts at one point in time.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub districts: Vec<DistrictId>,
    pub date: NaiveDate,
    pub query: SlotQuery,
    pub search_pincode: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DistrictError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Malformed(#[from] NormalizeError),
}

/// A district that contributed no rows, and why.
#[derive(Debug)]
pub struct DistrictFailure {
    pub district: DistrictId,
    pub error: DistrictError,
}

impl fmt::Display for DistrictFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "district {}: {}", self.district, self.error)
    }
}

#[derive(Debug)]
pub enum ScanOutcome {
    /// At least one row matched.
    Found(ResultSet),
    /// Data was fetched but nothing matched.
    Empty,
    /// Every requested district failed; there was nothing to filter.
    Unavailable,
}

#[derive(Debug)]
pub struct ScanReport {
    pub date: NaiveDate,
    pub districts: Vec<DistrictId>,
    pub outcome: ScanOutcome,
    pub failures: Vec<DistrictFailure>,
    pub geo_ranked: bool,
}

impl ScanReport {
    /// Ranked rows; empty unless the outcome is [`ScanOutcome::Found`].
    pub fn rows(&self) -> &[SlotRow] {
        match &self.outcome {
            ScanOutcome::Found(result) => result.rows(),
            ScanOutcome::Empty | ScanOutcome::Unavailable => &[],
        }
    }

    pub fn result_set(&self) -> Option<&ResultSet> {
        match &self.outcome {
            ScanOutcome::Found(result) => Some(result),
            ScanOutcome::Empty | ScanOutcome::Unavailable => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.outcome, ScanOutcome::Unavailable)
    }

    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Fetch → normalize → aggregate → geo-rank → filter/sort.
pub struct AvailabilityScanner<S, C = SystemClock> {
    calendar: CachedCalendar<S, C>,
    geocoder: Option<Arc<dyn PostalGeocoder>>,
}

impl<S, C> AvailabilityScanner<S, C>
where
    S: CalendarSource,
    C: Clock,
{
    pub fn new(calendar: CachedCalendar<S, C>) -> Self {
        Self {
            calendar,
            geocoder: None,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn PostalGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn calendar(&self) -> &CachedCalendar<S, C> {
        &self.calendar
    }

    /// Run one scan. Per-district failures are recorded in the report; only
    /// an invalid query aborts the scan.
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanReport, QueryError> {
        request.query.validate()?;

        let districts = unique_districts(&request.districts);
        let mut aggregate = ResultSet::default();
        let mut failures = Vec::new();

        for &district in &districts {
            match self.district_rows(district, request.date).await {
                Ok(rows) => {
                    debug!(%district, rows = rows.len(), "district normalized");
                    aggregate.extend(rows);
                }
                Err(error) => {
                    warn!(%district, %error, "district dropped from scan");
                    failures.push(DistrictFailure { district, error });
                }
            }
        }

        let geo_ranked = match request.search_pincode.as_deref() {
            Some(pincode) => self.rank_by_distance(pincode, &mut aggregate),
            None => false,
        };

        let ranked = query::apply(aggregate, &request.query)?;
        let outcome = if !districts.is_empty() && failures.len() == districts.len() {
            ScanOutcome::Unavailable
        } else if ranked.is_empty() {
            ScanOutcome::Empty
        } else {
            ScanOutcome::Found(ranked)
        };

        let report = ScanReport {
            date: request.date,
            districts,
            outcome,
            failures,
            geo_ranked,
        };

        info!(
            date = %report.date,
            districts = report.districts.len(),
            failed = report.failures.len(),
            rows = report.rows().len(),
            geo_ranked,
            "availability scan finished"
        );

        Ok(report)
    }

    async fn district_rows(
        &self,
        district: DistrictId,
        date: NaiveDate,
    ) -> Result<Vec<SlotRow>, DistrictError> {
        let centers = self.calendar.centers(district, date).await?;
        Ok(normalize_centers(&centers)?)
    }

    fn rank_by_distance(&self, pincode: &str, aggregate: &mut ResultSet) -> bool {
        let Some(geocoder) = self.geocoder.as_deref() else {
            warn!(pincode, "no postal code table configured, ranking by capacity");
            return false;
        };

        match GeoRanker::new(geocoder, pincode) {
            Some(ranker) => {
                ranker.rank(aggregate);
                true
            }
            None => false,
        }
    }
}

fn unique_districts(requested: &[DistrictId]) -> Vec<DistrictId> {
    let mut seen = HashSet::new();
    requested
        .iter()
        .copied()
        .filter(|district| seen.insert(*district))
        .collect()
}
