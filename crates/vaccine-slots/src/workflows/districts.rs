//! District name → id lookup table, bootstrapped once from upstream and
//! persisted as CSV.

use crate::workflows::availability::{CowinClient, DistrictId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::{debug, info, warn};

/// Upstream state codes queried when bootstrapping the directory.
pub const STATE_CODES: RangeInclusive<u32> = 1..=39;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistrictEntry {
    pub district_name: String,
    pub district_id: DistrictId,
}

#[derive(Debug, thiserror::Error)]
pub enum DistrictDirectoryError {
    #[error("failed to access district table: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid district table: {0}")]
    Csv(#[from] csv::Error),
    #[error("unknown district '{0}'")]
    UnknownDistrict(String),
    #[error("district list for state {state_code} unavailable: {message}")]
    Upstream { state_code: u32, message: String },
}

/// Upstream listing of districts per state.
#[async_trait]
pub trait DistrictSource: Send + Sync {
    async fn districts_for_state(
        &self,
        state_code: u32,
    ) -> Result<Vec<DistrictEntry>, DistrictDirectoryError>;
}

#[derive(Debug, Deserialize)]
struct DistrictListing {
    districts: Vec<DistrictEntry>,
}

#[async_trait]
impl DistrictSource for CowinClient {
    async fn districts_for_state(
        &self,
        state_code: u32,
    ) -> Result<Vec<DistrictEntry>, DistrictDirectoryError> {
        let url = format!("{}/admin/location/districts/{state_code}", self.base_url());
        debug!(%url, "fetching district listing");

        let upstream = |message: String| DistrictDirectoryError::Upstream {
            state_code,
            message,
        };

        let response = self
            .http()
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|err| upstream(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(upstream(format!("HTTP {}", status.as_u16())));
        }

        let listing: DistrictListing = response
            .json()
            .await
            .map_err(|err| upstream(err.to_string()))?;
        Ok(listing.districts)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistrictDirectory {
    entries: Vec<DistrictEntry>,
}

impl DistrictDirectory {
    /// Sorts by name and keeps the first entry seen for each id.
    pub fn new(entries: impl IntoIterator<Item = DistrictEntry>) -> Self {
        let mut seen = HashSet::new();
        let mut entries: Vec<DistrictEntry> = entries
            .into_iter()
            .map(|entry| DistrictEntry {
                district_name: entry.district_name.trim().to_string(),
                district_id: entry.district_id,
            })
            .filter(|entry| seen.insert(entry.district_id))
            .collect();
        entries.sort_by(|a, b| a.district_name.cmp(&b.district_name));
        Self { entries }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DistrictDirectoryError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DistrictDirectoryError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let entries = csv_reader
            .deserialize::<DistrictEntry>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(entries))
    }

    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), DistrictDirectoryError> {
        let file = std::fs::File::create(path)?;
        self.write_to(file)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), DistrictDirectoryError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for entry in &self.entries {
            csv_writer.serialize(entry)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Query every state code and merge the listings. States that fail are
    /// logged and skipped.
    pub async fn bootstrap<S>(source: &S, state_codes: RangeInclusive<u32>) -> Self
    where
        S: DistrictSource + ?Sized,
    {
        let mut collected = Vec::new();
        for state_code in state_codes {
            match source.districts_for_state(state_code).await {
                Ok(entries) => collected.extend(entries),
                Err(error) => warn!(state_code, %error, "skipping state during district sync"),
            }
        }

        let directory = Self::new(collected);
        info!(districts = directory.len(), "district directory bootstrapped");
        directory
    }

    pub fn resolve(&self, name: &str) -> Result<DistrictId, DistrictDirectoryError> {
        let wanted = name.trim();
        self.entries
            .iter()
            .find(|entry| entry.district_name == wanted)
            .map(|entry| entry.district_id)
            .ok_or_else(|| DistrictDirectoryError::UnknownDistrict(wanted.to_string()))
    }

    pub fn entries(&self) -> &[DistrictEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
