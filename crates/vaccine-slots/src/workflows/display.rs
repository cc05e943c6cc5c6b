//! Presentation of ranked rows: relabeled columns, date pivot, CSV and text
//! tables.

use crate::workflows::availability::{ScanOutcome, ScanReport, SlotRow};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::io::Write;

pub const NO_SLOTS_MESSAGE: &str = "No slots found for the selected filters.";

const BASE_COLUMNS: [&str; 10] = [
    "Date",
    "Min Age",
    "Available",
    "Vaccine",
    "Fee Type",
    "Pincode",
    "Center",
    "Address",
    "District",
    "State",
];
const DISTANCE_COLUMN: &str = "Distance (km)";

/// A [`SlotRow`] under its presentation labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Min Age")]
    pub min_age: u32,
    #[serde(rename = "Available")]
    pub available: u32,
    #[serde(rename = "Vaccine")]
    pub vaccine: String,
    #[serde(rename = "Fee Type")]
    pub fee_type: &'static str,
    #[serde(rename = "Pincode")]
    pub pincode: String,
    #[serde(rename = "Center")]
    pub center: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "District")]
    pub district: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Distance (km)", skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<u32>,
}

impl SlotView {
    pub fn from_row(row: &SlotRow) -> Self {
        Self {
            date: crate::workflows::availability::format_upstream_date(row.date),
            min_age: row.min_age_limit,
            available: row.available_capacity,
            vaccine: row.vaccine.clone(),
            fee_type: row.fee_type.label(),
            pincode: row.pincode.clone(),
            center: row.center_name.clone(),
            address: row.address.clone(),
            district: row.district_name.clone(),
            state: row.state_name.clone(),
            distance_km: row.distance_km,
        }
    }

    fn cells(&self, with_distance: bool) -> Vec<String> {
        let mut cells = vec![
            self.date.clone(),
            self.min_age.to_string(),
            self.available.to_string(),
            self.vaccine.clone(),
            self.fee_type.to_string(),
            self.pincode.clone(),
            self.center.clone(),
            self.address.clone(),
            self.district.clone(),
            self.state.clone(),
        ];
        if with_distance {
            cells.push(
                self.distance_km
                    .map(|km| km.to_string())
                    .unwrap_or_default(),
            );
        }
        cells
    }
}

/// Relabeled rows plus the header set they are shown under.
#[derive(Debug, Clone, Serialize)]
pub struct SlotTable {
    pub columns: Vec<&'static str>,
    pub rows: Vec<SlotView>,
}

impl SlotTable {
    pub fn from_rows(rows: &[SlotRow], with_distance: bool) -> Self {
        let mut columns = BASE_COLUMNS.to_vec();
        if with_distance {
            columns.push(DISTANCE_COLUMN);
        }
        Self {
            columns,
            rows: rows.iter().map(SlotView::from_row).collect(),
        }
    }

    pub fn from_report(report: &ScanReport) -> Self {
        Self::from_rows(report.rows(), report.geo_ranked)
    }

    fn with_distance(&self) -> bool {
        self.columns.contains(&DISTANCE_COLUMN)
    }

    fn body(&self) -> Vec<Vec<String>> {
        let with_distance = self.with_distance();
        self.rows
            .iter()
            .map(|row| row.cells(with_distance))
            .collect()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.columns)?;
        for record in self.body() {
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn render_text(&self) -> String {
        let headers: Vec<String> = self.columns.iter().map(|c| c.to_string()).collect();
        render_text_table(&headers, &self.body())
    }

    pub fn render_html(&self) -> String {
        let headers: Vec<String> = self.columns.iter().map(|c| c.to_string()).collect();
        render_html_table(&headers, &self.body())
    }
}

/// Capacity per center and date; absent combinations are zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PivotTable {
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<PivotRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PivotRow {
    pub center_id: u64,
    pub center: String,
    pub pincode: String,
    pub capacities: Vec<u32>,
}

impl PivotTable {
    /// One row per center id, in the order centers first appear in `rows`.
    /// Capacities saturate at `u32::MAX`.
    pub fn from_rows(rows: &[SlotRow]) -> Self {
        let dates: Vec<NaiveDate> = rows
            .iter()
            .map(|row| row.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let date_index: HashMap<NaiveDate, usize> = dates
            .iter()
            .enumerate()
            .map(|(index, date)| (*date, index))
            .collect();

        let mut pivot_rows: Vec<PivotRow> = Vec::new();
        let mut center_index: HashMap<u64, usize> = HashMap::new();

        for row in rows {
            let position = *center_index.entry(row.center_id).or_insert_with(|| {
                pivot_rows.push(PivotRow {
                    center_id: row.center_id,
                    center: row.center_name.clone(),
                    pincode: row.pincode.clone(),
                    capacities: vec![0; dates.len()],
                });
                pivot_rows.len() - 1
            });
            if let Some(&column) = date_index.get(&row.date) {
                let cell = &mut pivot_rows[position].capacities[column];
                *cell = cell.saturating_add(row.available_capacity);
            }
        }

        Self {
            dates,
            rows: pivot_rows,
        }
    }

    pub fn headers(&self) -> Vec<String> {
        let mut headers = vec!["Center".to_string(), "Pincode".to_string()];
        headers.extend(
            self.dates
                .iter()
                .map(|date| crate::workflows::availability::format_upstream_date(*date)),
        );
        headers
    }

    fn body(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                let mut cells = vec![row.center.clone(), row.pincode.clone()];
                cells.extend(row.capacities.iter().map(u32::to_string));
                cells
            })
            .collect()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.headers())?;
        for record in self.body() {
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String, csv::Error> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn render_text(&self) -> String {
        render_text_table(&self.headers(), &self.body())
    }
}

/// User-facing line for reports without rows, distinguishing an empty
/// search from a failed fetch.
pub fn status_message(report: &ScanReport) -> Option<String> {
    match &report.outcome {
        ScanOutcome::Found(_) => None,
        ScanOutcome::Empty => Some(NO_SLOTS_MESSAGE.to_string()),
        ScanOutcome::Unavailable => Some(format!(
            "Could not fetch availability data: {}",
            report.failure_summary()
        )),
    }
}

pub fn render_text_table(headers: &[String], body: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in body {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let line = |out: &mut String, cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect();
        let _ = writeln!(out, "{}", padded.join(" | ").trim_end());
    };

    line(&mut out, headers);
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    let _ = writeln!(out, "{}", rule.join("-+-"));
    for row in body {
        line(&mut out, row);
    }
    out
}

pub fn render_html_table(headers: &[String], body: &[Vec<String>]) -> String {
    let mut html = String::from("<table border=\"1\" class=\"dataframe\">\n<thead>\n<tr>");
    for header in headers {
        let _ = write!(html, "<th>{}</th>", escape_html(header));
    }
    html.push_str("</tr>\n</thead>\n<tbody>\n");
    for row in body {
        html.push_str("<tr>");
        for cell in row {
            let _ = write!(html, "<td>{}</td>", escape_html(cell));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody>\n</table>");
    html
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
