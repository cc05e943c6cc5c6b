//! Slot availability pipeline: fetch, cache and retry, normalize, aggregate,
//! rank by distance, then filter and sort.

pub mod cache;
pub mod domain;
pub mod fetcher;
pub mod geo;
pub mod normalizer;
pub mod pipeline;
pub mod query;
pub mod retry;

pub use cache::{Clock, ManualClock, SystemClock, TtlCache};
pub use domain::{
    format_upstream_date, parse_upstream_date, scan_date, DistrictId, FeeType, ResultSet,
    ScanDateOutOfRange, SlotRow,
};
pub use fetcher::{CalendarSource, CowinClient, FetchError};
pub use geo::{GeoPoint, GeoRanker, GeoTableError, PostalCodeTable, PostalGeocoder};
pub use normalizer::{normalize_centers, NormalizeError};
pub use pipeline::{
    AvailabilityScanner, DistrictError, DistrictFailure, ScanOutcome, ScanReport, ScanRequest,
};
pub use query::{QueryError, SlotQuery};
pub use retry::{CachedCalendar, CalendarRequest, RetryPolicy};
