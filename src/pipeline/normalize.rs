use crate::constants::DATE_FORMAT;
use crate::dataset::Dataset;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;

const DATE_ONLY_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Interpret a review value as a calendar date.
///
/// Accepts ISO dates, slash-separated dates (year-first or US month-first),
/// naive timestamps and RFC 3339 timestamps (the date part is kept). Returns `None` for blank or
/// unrecognized values.
pub fn parse_review_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    for format in DATE_ONLY_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.date_naive())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NormalizeStats {
    pub parsed: usize,
    /// Blank cells, left blank
    pub missing: usize,
    /// Non-blank cells that were not dates and became blank
    pub unparsed: usize,
}

/// Rewrite a date column in canonical `YYYY-MM-DD` form. Values that are not
/// dates become empty cells instead of failing the whole dataset.
pub fn normalize_dates(dataset: &mut Dataset, column: usize) -> NormalizeStats {
    let mut stats = NormalizeStats::default();
    dataset.map_column(column, |cell| match parse_review_date(cell) {
        Some(date) => {
            stats.parsed += 1;
            date.format(DATE_FORMAT).to_string()
        }
        None => {
            if cell.trim().is_empty() {
                stats.missing += 1;
            } else {
                stats.unparsed += 1;
            }
            String::new()
        }
    });
    stats
}
