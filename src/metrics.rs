//! Cleaning step metrics
//!
//! Only the `metrics` facade is used here. Installing a recorder (Prometheus,
//! push gateway, ...) is left to whatever orchestrates the pipeline; without
//! one every call below is a no-op.

/// Build a metric name following the `basic_cleaning_<name>[_total]` convention.
#[macro_export]
macro_rules! cleaning_metric {
    (counter, $name:literal) => {
        concat!("basic_cleaning_", $name, "_total")
    };
    (histogram, $name:literal) => {
        concat!("basic_cleaning_", $name)
    };
}

pub struct CleaningMetrics;

impl CleaningMetrics {
    pub fn record_rows_read(rows: usize) {
        ::metrics::counter!(cleaning_metric!(counter, "rows_read")).increment(rows as u64);
    }

    pub fn record_rows_kept(rows: usize) {
        ::metrics::counter!(cleaning_metric!(counter, "rows_kept")).increment(rows as u64);
    }

    pub fn record_rows_dropped(rows: usize) {
        ::metrics::counter!(cleaning_metric!(counter, "rows_dropped")).increment(rows as u64);
    }

    /// Review dates that could not be parsed and were nulled
    pub fn record_unparsed_dates(values: usize) {
        ::metrics::counter!(cleaning_metric!(counter, "unparsed_review_dates"))
            .increment(values as u64);
    }

    pub fn record_publish_duration(seconds: f64) {
        ::metrics::histogram!(cleaning_metric!(histogram, "publish_duration_seconds"))
            .record(seconds);
    }

    pub fn record_run(outcome: &'static str) {
        ::metrics::counter!(cleaning_metric!(counter, "runs"), "outcome" => outcome).increment(1);
    }
}
