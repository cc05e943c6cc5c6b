use super::domain::{parse_upstream_date, FeeType, SlotRow};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Facility record as served by the calendar endpoint.
///
/// `block_name` is not captured: the sub-district label is noise for slot
/// search and is dropped on purpose.
#[derive(Debug, Deserialize)]
pub struct RawCenter {
    pub center_id: u64,
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub state_name: String,
    pub district_name: String,
    #[serde(deserialize_with = "pincode_as_string")]
    pub pincode: String,
    pub fee_type: FeeType,
    #[serde(default)]
    pub sessions: Vec<RawSession>,
}

#[derive(Debug, Deserialize)]
pub struct RawSession {
    pub date: String,
    pub min_age_limit: u32,
    pub available_capacity: Value,
    #[serde(default)]
    pub vaccine: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("center #{index} does not match the calendar schema: {source}")]
    Schema {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("center {center_id} reports non-integer capacity {value}")]
    Capacity { center_id: u64, value: String },
    #[error("center {center_id} has a session dated '{value}', expected DD-MM-YYYY")]
    Date { center_id: u64, value: String },
}

/// Flatten one district's `centers` array into one row per session.
///
/// Any malformed center fails the whole batch so the caller can drop the
/// district as a unit.
pub fn normalize_centers(centers: &[Value]) -> Result<Vec<SlotRow>, NormalizeError> {
    let mut rows = Vec::new();

    for (index, value) in centers.iter().enumerate() {
        let center = RawCenter::deserialize(value)
            .map_err(|source| NormalizeError::Schema { index, source })?;
        rows.extend(flatten_center(center)?);
    }

    Ok(rows)
}

fn flatten_center(center: RawCenter) -> Result<Vec<SlotRow>, NormalizeError> {
    let RawCenter {
        center_id,
        name,
        address,
        state_name,
        district_name,
        pincode,
        fee_type,
        sessions,
    } = center;

    sessions
        .into_iter()
        .map(|session| {
            let available_capacity =
                coerce_capacity(&session.available_capacity).ok_or_else(|| {
                    NormalizeError::Capacity {
                        center_id,
                        value: session.available_capacity.to_string(),
                    }
                })?;
            let date = parse_upstream_date(&session.date).map_err(|_| NormalizeError::Date {
                center_id,
                value: session.date.clone(),
            })?;

            Ok(SlotRow {
                center_id,
                center_name: name.clone(),
                address: address.clone(),
                pincode: pincode.clone(),
                state_name: state_name.clone(),
                district_name: district_name.clone(),
                date,
                min_age_limit: session.min_age_limit,
                available_capacity,
                vaccine: session.vaccine,
                fee_type,
                distance_km: None,
            })
        })
        .collect()
}

/// Accepts whole, non-negative numbers and numeric strings.
fn coerce_capacity(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|raw| raw.is_finite() && raw.fract() == 0.0 && *raw >= 0.0)
                    .map(|raw| raw as u64)
            })
            .and_then(|raw| u32::try_from(raw).ok()),
        Value::String(raw) => raw.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn pincode_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => Ok(number.to_string()),
        Value::String(raw) if !raw.trim().is_empty() => Ok(raw.trim().to_string()),
        other => Err(serde::de::Error::custom(format!(
            "pincode must be a number or non-empty string, got {other}"
        ))),
    }
}
