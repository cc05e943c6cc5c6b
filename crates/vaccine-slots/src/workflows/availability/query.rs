use super::domain::{FeeType, ResultSet, SlotRow};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Searcher-side criteria applied to an aggregated result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotQuery {
    /// Age of the person booking; rows demanding an older minimum are dropped.
    pub age_threshold: u32,
    pub fee_types: BTreeSet<FeeType>,
    #[serde(default)]
    pub show_empty: bool,
}

impl SlotQuery {
    pub fn new(age_threshold: u32) -> Self {
        Self {
            age_threshold,
            fee_types: FeeType::all().into_iter().collect(),
            show_empty: false,
        }
    }

    pub fn with_fee_types(mut self, fee_types: impl IntoIterator<Item = FeeType>) -> Self {
        self.fee_types = fee_types.into_iter().collect();
        self
    }

    pub fn showing_empty(mut self, show_empty: bool) -> Self {
        self.show_empty = show_empty;
        self
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.age_threshold == 0 {
            return Err(QueryError::InvalidAgeThreshold);
        }
        if self.fee_types.is_empty() {
            return Err(QueryError::NoFeeTypes);
        }
        Ok(())
    }

    pub fn admits(&self, row: &SlotRow) -> bool {
        row.min_age_limit <= self.age_threshold
            && (self.show_empty || row.available_capacity > 0)
            && self.fee_types.contains(&row.fee_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("age threshold must be a positive number of years")]
    InvalidAgeThreshold,
    #[error("at least one fee type must be selected")]
    NoFeeTypes,
}

/// Filter and order an aggregate.
///
/// Distance-ranked sets sort by distance ascending then capacity descending;
/// otherwise capacity descending alone. The sort is stable, so ties keep
/// their aggregate order.
pub fn apply(mut result: ResultSet, query: &SlotQuery) -> Result<ResultSet, QueryError> {
    query.validate()?;

    result.retain(|row| query.admits(row));

    if result.is_distance_ranked() {
        result.sort_by(|a, b| {
            distance_key(a)
                .cmp(&distance_key(b))
                .then_with(|| by_capacity_desc(a, b))
        });
    } else {
        result.sort_by(by_capacity_desc);
    }

    Ok(result)
}

fn distance_key(row: &SlotRow) -> u32 {
    row.distance_km.unwrap_or(u32::MAX)
}

fn by_capacity_desc(a: &SlotRow, b: &SlotRow) -> Ordering {
    b.available_capacity.cmp(&a.available_capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(center_id: u64, min_age: u32, capacity: u32, fee: FeeType) -> SlotRow {
        SlotRow {
            center_id,
            center_name: format!("Center {center_id}"),
            address: String::new(),
            pincode: "380015".to_string(),
            state_name: "Gujarat".to_string(),
            district_name: "Ahmedabad".to_string(),
            date: NaiveDate::from_ymd_opt(2021, 5, 4).unwrap(),
            min_age_limit: min_age,
            available_capacity: capacity,
            vaccine: "COVISHIELD".to_string(),
            fee_type: fee,
            distance_km: None,
        }
    }

    fn ids(result: &ResultSet) -> Vec<u64> {
        result.rows().iter().map(|row| row.center_id).collect()
    }

    #[test]
    fn filters_by_age_capacity_and_fee() {
        let aggregate = ResultSet::new(vec![
            row(1, 18, 5, FeeType::Free),
            row(2, 45, 9, FeeType::Free),
            row(3, 18, 0, FeeType::Free),
            row(4, 18, 3, FeeType::Paid),
        ]);

        let query = SlotQuery::new(40).with_fee_types([FeeType::Free]);
        let result = apply(aggregate.clone(), &query).expect("valid query");
        assert_eq!(ids(&result), vec![1]);

        let result = apply(aggregate, &SlotQuery::new(45).showing_empty(true)).expect("valid");
        assert_eq!(ids(&result), vec![2, 1, 4, 3]);
        assert!(result
            .rows()
            .iter()
            .all(|row| row.min_age_limit <= 45));
    }

    #[test]
    fn capacity_sort_is_stable_for_ties() {
        let aggregate = ResultSet::new(vec![
            row(1, 18, 2, FeeType::Free),
            row(2, 18, 7, FeeType::Free),
            row(3, 18, 2, FeeType::Paid),
            row(4, 18, 7, FeeType::Paid),
        ]);

        let result = apply(aggregate, &SlotQuery::new(18)).expect("valid query");
        assert_eq!(ids(&result), vec![2, 4, 1, 3]);
    }

    #[test]
    fn distance_ranked_sets_sort_by_distance_then_capacity() {
        let mut rows = vec![
            row(1, 18, 1, FeeType::Free),
            row(2, 18, 9, FeeType::Free),
            row(3, 18, 4, FeeType::Free),
            row(4, 18, 8, FeeType::Free),
        ];
        rows[0].distance_km = Some(3);
        rows[1].distance_km = Some(12);
        rows[2].distance_km = Some(3);
        rows[3].distance_km = Some(9999);

        let mut aggregate = ResultSet::new(rows);
        aggregate.mark_distance_ranked();

        let result = apply(aggregate, &SlotQuery::new(18)).expect("valid query");
        assert_eq!(ids(&result), vec![3, 1, 2, 4]);
        assert!(result.is_distance_ranked());
    }

    #[test]
    fn invalid_queries_are_rejected() {
        let empty = ResultSet::default();
        assert_eq!(
            apply(empty.clone(), &SlotQuery::new(0)),
            Err(QueryError::InvalidAgeThreshold)
        );
        assert_eq!(
            apply(empty, &SlotQuery::new(18).with_fee_types(Vec::new())),
            Err(QueryError::NoFeeTypes)
        );
    }

    #[test]
    fn empty_results_are_not_errors() {
        let aggregate = ResultSet::new(vec![row(1, 45, 5, FeeType::Free)]);
        let result = apply(aggregate, &SlotQuery::new(18)).expect("valid query");
        assert!(result.is_empty());
    }
}
