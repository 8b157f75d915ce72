//! Metrics and observability utilities
//!
//! Counters and histograms for the harvesting pipeline with
//! standardized naming conventions. Without an installed recorder
//! every helper is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all PaperMap metrics
pub const METRICS_PREFIX: &str = "papermap";

/// Buckets for classifier latency (zero-shot models are slow)
pub const CLASSIFIER_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    20.00,  // 20s
    60.00,  // 1m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Fetch metrics
    describe_counter!(
        format!("{}_pages_fetched_total", METRICS_PREFIX),
        Unit::Count,
        "Total search result pages fetched"
    );

    describe_counter!(
        format!("{}_fetch_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total failed page fetches"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_papers_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Papers stored, by outcome"
    );

    describe_counter!(
        format!("{}_malformed_records_total", METRICS_PREFIX),
        Unit::Count,
        "Raw records rejected by the normalizer"
    );

    describe_gauge!(
        format!("{}_category_offset", METRICS_PREFIX),
        Unit::Count,
        "Next pagination offset per category"
    );

    // Classification metrics
    describe_counter!(
        format!("{}_classifications_stored_total", METRICS_PREFIX),
        Unit::Count,
        "Classification rows appended"
    );

    describe_counter!(
        format!("{}_classifier_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Classifier calls that failed"
    );

    describe_histogram!(
        format!("{}_classifier_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Classifier call latency in seconds"
    );

    // Run metrics
    describe_histogram!(
        format!("{}_run_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Pipeline run duration in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Record a fetched page
pub fn record_page(category: &str, records: usize, offset: u64) {
    counter!(
        format!("{}_pages_fetched_total", METRICS_PREFIX),
        "category" => category.to_string(),
        "empty" => (records == 0).to_string()
    )
    .increment(1);

    gauge!(
        format!("{}_category_offset", METRICS_PREFIX),
        "category" => category.to_string()
    )
    .set(offset as f64);
}

/// Record a failed fetch
pub fn record_fetch_error(category: &str) {
    counter!(
        format!("{}_fetch_errors_total", METRICS_PREFIX),
        "category" => category.to_string()
    )
    .increment(1);
}

/// Record the outcome of one paper insert (inserted, duplicate, partial, failed)
pub fn record_insert(outcome: &'static str) {
    counter!(
        format!("{}_papers_ingested_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record records rejected by the normalizer
pub fn record_malformed(category: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        format!("{}_malformed_records_total", METRICS_PREFIX),
        "category" => category.to_string()
    )
    .increment(count as u64);
}

/// Record one classifier call
pub fn record_classification(duration_secs: f64, model: &str, rows_stored: usize, success: bool) {
    if success {
        histogram!(
            format!("{}_classifier_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);

        counter!(format!("{}_classifications_stored_total", METRICS_PREFIX))
            .increment(rows_stored as u64);
    } else {
        counter!(
            format!("{}_classifier_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Record a finished pipeline run
pub fn record_run(duration_secs: f64, new_papers: bool) {
    histogram!(
        format!("{}_run_duration_seconds", METRICS_PREFIX),
        "new_papers" => new_papers.to_string()
    )
    .record(duration_secs);
}
