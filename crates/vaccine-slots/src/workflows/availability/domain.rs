use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Date layout used by the upstream calendar endpoint.
pub const UPSTREAM_DATE_FORMAT: &str = "%d-%m-%Y";

/// Opaque upstream identifier for an administrative district.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DistrictId(u32);

impl DistrictId {
    pub const fn new(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DistrictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("district id must be a positive integer, got '{0}'")]
pub struct InvalidDistrictId(pub String);

impl TryFrom<u32> for DistrictId {
    type Error = InvalidDistrictId;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| InvalidDistrictId(value.to_string()))
    }
}

impl From<DistrictId> for u32 {
    fn from(value: DistrictId) -> Self {
        value.0
    }
}

impl FromStr for DistrictId {
    type Err = InvalidDistrictId;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.trim()
            .parse::<u32>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| InvalidDistrictId(raw.to_string()))
    }
}

/// Fee classification reported by upstream. The literals are case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeeType {
    Free,
    Paid,
}

impl FeeType {
    pub const fn all() -> [Self; 2] {
        [Self::Free, Self::Paid]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Paid => "Paid",
        }
    }
}

impl fmt::Display for FeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fee type must be 'Free' or 'Paid', got '{0}'")]
pub struct InvalidFeeType(pub String);

impl FromStr for FeeType {
    type Err = InvalidFeeType;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "Free" => Ok(Self::Free),
            "Paid" => Ok(Self::Paid),
            other => Err(InvalidFeeType(other.to_string())),
        }
    }
}

/// One bookable (center, session) pair, flattened out of the upstream calendar.
///
/// The sub-district block label is not carried; every other center and
/// session field survives normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotRow {
    pub center_id: u64,
    pub center_name: String,
    pub address: String,
    pub pincode: String,
    pub state_name: String,
    pub district_name: String,
    pub date: NaiveDate,
    pub min_age_limit: u32,
    pub available_capacity: u32,
    pub vaccine: String,
    pub fee_type: FeeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<u32>,
}

/// Ordered rows produced by one scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    rows: Vec<SlotRow>,
    distance_ranked: bool,
}

impl ResultSet {
    pub fn new(rows: Vec<SlotRow>) -> Self {
        Self {
            rows,
            distance_ranked: false,
        }
    }

    pub fn rows(&self) -> &[SlotRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [SlotRow] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<SlotRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = SlotRow>) {
        self.rows.extend(rows);
    }

    /// True once every row carries a distance from the search postal code.
    pub fn is_distance_ranked(&self) -> bool {
        self.distance_ranked
    }

    pub(crate) fn mark_distance_ranked(&mut self) {
        self.distance_ranked = true;
    }

    pub(crate) fn retain(&mut self, predicate: impl FnMut(&SlotRow) -> bool) {
        self.rows.retain(predicate);
    }

    pub(crate) fn sort_by(
        &mut self,
        compare: impl FnMut(&SlotRow, &SlotRow) -> std::cmp::Ordering,
    ) {
        self.rows.sort_by(compare);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a {lookahead_days} day lookahead from {today} is outside the supported calendar")]
pub struct ScanDateOutOfRange {
    pub today: NaiveDate,
    pub lookahead_days: u32,
}

/// Calendar date a scan targets: `today` for a one-day lookahead, one day
/// later for each additional day.
pub fn scan_date(today: NaiveDate, lookahead_days: u32) -> Result<NaiveDate, ScanDateOutOfRange> {
    let offset = i64::from(lookahead_days.max(1) - 1);
    today
        .checked_add_signed(Duration::days(offset))
        .ok_or(ScanDateOutOfRange {
            today,
            lookahead_days,
        })
}

pub fn format_upstream_date(date: NaiveDate) -> String {
    date.format(UPSTREAM_DATE_FORMAT).to_string()
}

pub fn parse_upstream_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), UPSTREAM_DATE_FORMAT)
        .map_err(|err| format!("failed to parse '{raw}' as DD-MM-YYYY ({err})"))
}
