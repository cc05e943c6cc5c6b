//! Postal-code geocoding and distance ranking.

use super::domain::ResultSet;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Distance assigned to rows whose pincode cannot be located; sorts last.
pub const UNRESOLVED_DISTANCE_KM: u32 = 9999;

const EARTH_RADIUS_KM: f64 = 6371.0088;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance in kilometers.
    pub fn haversine_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Postal-code lookup for a single country.
pub trait PostalGeocoder: Send + Sync {
    fn locate(&self, postal_code: &str) -> Option<GeoPoint>;

    fn distance_km(&self, from: &str, to: &str) -> Option<f64> {
        let origin = self.locate(from).filter(GeoPoint::is_valid)?;
        let target = self.locate(to).filter(GeoPoint::is_valid)?;
        Some(origin.haversine_km(&target))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeoTableError {
    #[error("failed to read postal code table: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid postal code table: {0}")]
    Csv(#[from] csv::Error),
}

/// In-memory postal code table loaded from a GeoNames country dump
/// (tab separated; postal code in column 2, latitude/longitude in 10 and 11).
///
/// Codes listed several times resolve to the mean of their coordinates.
#[derive(Debug, Default, Clone)]
pub struct PostalCodeTable {
    points: HashMap<String, GeoPoint>,
}

impl PostalCodeTable {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, GeoTableError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, GeoTableError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut sums: HashMap<String, (f64, f64, u32)> = HashMap::new();
        let mut skipped = 0usize;

        for record in csv_reader.records() {
            let record = record?;
            let parsed = (
                record.get(1).map(str::trim).filter(|code| !code.is_empty()),
                record.get(9).and_then(|raw| raw.trim().parse::<f64>().ok()),
                record.get(10).and_then(|raw| raw.trim().parse::<f64>().ok()),
            );

            let (Some(code), Some(latitude), Some(longitude)) = parsed else {
                skipped += 1;
                continue;
            };

            let entry = sums.entry(code.to_string()).or_insert((0.0, 0.0, 0));
            entry.0 += latitude;
            entry.1 += longitude;
            entry.2 += 1;
        }

        if skipped > 0 {
            debug!(skipped, "postal code rows without usable coordinates");
        }

        let points = sums
            .into_iter()
            .map(|(code, (lat, lon, count))| {
                let count = f64::from(count);
                (code, GeoPoint::new(lat / count, lon / count))
            })
            .collect();

        Ok(Self { points })
    }

    pub fn insert(&mut self, postal_code: impl Into<String>, point: GeoPoint) {
        self.points.insert(postal_code.into(), point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl PostalGeocoder for PostalCodeTable {
    fn locate(&self, postal_code: &str) -> Option<GeoPoint> {
        self.points.get(postal_code.trim()).copied()
    }
}

/// Annotates rows with their distance from a search postal code.
///
/// Construction fails when the origin itself cannot be located, so callers
/// decide on the fallback before any row is touched.
pub struct GeoRanker<'a> {
    geocoder: &'a dyn PostalGeocoder,
    origin: String,
}

impl<'a> GeoRanker<'a> {
    pub fn new(geocoder: &'a dyn PostalGeocoder, origin: &str) -> Option<Self> {
        let origin = origin.trim();
        match geocoder.locate(origin) {
            Some(point) if point.is_valid() => Some(Self {
                geocoder,
                origin: origin.to_string(),
            }),
            _ => {
                warn!(pincode = origin, "search pincode could not be located");
                None
            }
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn rank(&self, result: &mut ResultSet) {
        let mut resolved: HashMap<String, u32> = HashMap::new();

        for row in result.rows_mut() {
            let distance = *resolved
                .entry(row.pincode.clone())
                .or_insert_with(|| self.distance_to(&row.pincode));
            row.distance_km = Some(distance);
        }

        result.mark_distance_ranked();
    }

    fn distance_to(&self, pincode: &str) -> u32 {
        self.geocoder
            .distance_km(&self.origin, pincode)
            .filter(|km| km.is_finite())
            .map(|km| km.round() as u32)
            .unwrap_or(UNRESOLVED_DISTANCE_KM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "IN\t380015\tSatellite\tGujarat\t07\tAhmadabad\t474\t\t\t23.0300\t72.5300\t4\n\
IN\t380015\tJodhpur Tekra\tGujarat\t07\tAhmadabad\t474\t\t\t23.0100\t72.5100\t4\n\
IN\t380001\tAhmedabad GPO\tGujarat\t07\tAhmadabad\t474\t\t\t23.0225\t72.5714\t4\n\
IN\t390001\tVadodara\tGujarat\t07\tVadodara\t486\t\t\t22.3072\t73.1812\t4\n\
IN\t999999\tNowhere\t\t\t\t\t\t\t\t\t\n";

    #[test]
    fn table_averages_duplicate_codes_and_skips_blank_rows() {
        let table = PostalCodeTable::from_reader(Cursor::new(SAMPLE)).expect("table parses");
        assert_eq!(table.len(), 3);

        let point = table.locate("380015").expect("code present");
        assert!((point.latitude - 23.02).abs() < 1e-9);
        assert!((point.longitude - 72.52).abs() < 1e-9);
        assert!(table.locate("999999").is_none());
    }

    #[test]
    fn haversine_matches_known_distance() {
        let ahmedabad = GeoPoint::new(23.0225, 72.5714);
        let vadodara = GeoPoint::new(22.3072, 73.1812);
        let km = ahmedabad.haversine_km(&vadodara);
        assert!((km - 100.0).abs() < 5.0, "got {km}");
        assert_eq!(ahmedabad.haversine_km(&ahmedabad), 0.0);
    }

    #[test]
    fn invalid_points_are_rejected() {
        assert!(!GeoPoint::new(f64::NAN, 72.0).is_valid());
        assert!(!GeoPoint::new(91.0, 72.0).is_valid());
        assert!(GeoPoint::new(23.0, 72.0).is_valid());
    }

    #[test]
    fn ranker_requires_a_locatable_origin() {
        let table = PostalCodeTable::from_reader(Cursor::new(SAMPLE)).expect("table parses");
        assert!(GeoRanker::new(&table, "000000").is_none());
        let ranker = GeoRanker::new(&table, " 380001 ").expect("origin located");
        assert_eq!(ranker.origin(), "380001");
        assert_eq!(ranker.distance_to("380001"), 0);
        assert_eq!(ranker.distance_to("123456"), UNRESOLVED_DISTANCE_KM);
    }
}
