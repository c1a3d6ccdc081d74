//! Pipeline metrics, grouped by the stage that records them.
//!
//! Recording is always safe: without an installed recorder the macros are no-ops.

use crate::common::constants::METRICS_PORT_ENV;
use std::net::SocketAddr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Every metric name the pipeline records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    Heartbeat,
    SourcesRequestsSuccess,
    SourcesRequestsError,
    SourcesRequestDuration,
    SourcesRecordsFetched,
    NormalizeRecordsEmitted,
    NormalizeRecordsRejected,
    StoreRecordsInserted,
    StoreRecordsReplaced,
    StoreRecordsUnchanged,
    StoreWriteErrors,
    BatchDuration,
    BatchesCancelled,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Heartbeat => "earth_data_heartbeat_total",
            MetricName::SourcesRequestsSuccess => "earth_data_sources_requests_success_total",
            MetricName::SourcesRequestsError => "earth_data_sources_requests_error_total",
            MetricName::SourcesRequestDuration => "earth_data_sources_request_duration_seconds",
            MetricName::SourcesRecordsFetched => "earth_data_sources_records_fetched_total",
            MetricName::NormalizeRecordsEmitted => "earth_data_normalize_records_emitted_total",
            MetricName::NormalizeRecordsRejected => "earth_data_normalize_records_rejected_total",
            MetricName::StoreRecordsInserted => "earth_data_store_records_inserted_total",
            MetricName::StoreRecordsReplaced => "earth_data_store_records_replaced_total",
            MetricName::StoreRecordsUnchanged => "earth_data_store_records_unchanged_total",
            MetricName::StoreWriteErrors => "earth_data_store_write_errors_total",
            MetricName::BatchDuration => "earth_data_batch_duration_seconds",
            MetricName::BatchesCancelled => "earth_data_batches_cancelled_total",
        }
    }
}

/// Install the Prometheus recorder, with an HTTP listener when
/// `EARTH_DATA_METRICS_PORT` is set. Idempotent; must run inside a tokio runtime.
pub fn init() {
    INIT.call_once(|| {
        let Some(port) = std::env::var(METRICS_PORT_ENV).ok() else {
            info!("Metrics exporter disabled ({} not set)", METRICS_PORT_ENV);
            return;
        };
        let addr: SocketAddr = match format!("0.0.0.0:{}", port.trim()).parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Invalid {} '{}': {}", METRICS_PORT_ENV, port, e);
                return;
            }
        };
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
            Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
        }
    });
}

pub fn heartbeat() {
    ::metrics::counter!(MetricName::Heartbeat.as_str()).increment(1);
}

pub struct SourcesMetrics;

impl SourcesMetrics {
    pub fn record_success(source: &'static str, duration_secs: f64, records: usize) {
        ::metrics::counter!(MetricName::SourcesRequestsSuccess.as_str(), "source" => source).increment(1);
        ::metrics::histogram!(MetricName::SourcesRequestDuration.as_str(), "source" => source)
            .record(duration_secs);
        ::metrics::counter!(MetricName::SourcesRecordsFetched.as_str(), "source" => source)
            .increment(records as u64);
    }

    pub fn record_error(source: &'static str, error_kind: &'static str) {
        ::metrics::counter!(
            MetricName::SourcesRequestsError.as_str(),
            "source" => source,
            "error" => error_kind
        )
        .increment(1);
    }
}

pub struct NormalizeMetrics;

impl NormalizeMetrics {
    pub fn record_pass(emitted: usize, rejected: usize) {
        ::metrics::counter!(MetricName::NormalizeRecordsEmitted.as_str()).increment(emitted as u64);
        ::metrics::counter!(MetricName::NormalizeRecordsRejected.as_str()).increment(rejected as u64);
    }
}

pub struct StoreMetrics;

impl StoreMetrics {
    pub fn record_persist(inserted: usize, replaced: usize, unchanged: usize) {
        ::metrics::counter!(MetricName::StoreRecordsInserted.as_str()).increment(inserted as u64);
        ::metrics::counter!(MetricName::StoreRecordsReplaced.as_str()).increment(replaced as u64);
        ::metrics::counter!(MetricName::StoreRecordsUnchanged.as_str()).increment(unchanged as u64);
    }

    pub fn record_error() {
        ::metrics::counter!(MetricName::StoreWriteErrors.as_str()).increment(1);
    }
}

pub struct BatchMetrics;

impl BatchMetrics {
    pub fn record_duration(duration_secs: f64) {
        ::metrics::histogram!(MetricName::BatchDuration.as_str()).record(duration_secs);
    }

    pub fn record_cancelled() {
        ::metrics::counter!(MetricName::BatchesCancelled.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed_and_unique() {
        let all = [
            MetricName::Heartbeat,
            MetricName::SourcesRequestsSuccess,
            MetricName::SourcesRequestsError,
            MetricName::SourcesRequestDuration,
            MetricName::SourcesRecordsFetched,
            MetricName::NormalizeRecordsEmitted,
            MetricName::NormalizeRecordsRejected,
            MetricName::StoreRecordsInserted,
            MetricName::StoreRecordsReplaced,
            MetricName::StoreRecordsUnchanged,
            MetricName::StoreWriteErrors,
            MetricName::BatchDuration,
            MetricName::BatchesCancelled,
        ];
        let names: std::collections::HashSet<_> = all.iter().map(|m| m.as_str()).collect();
        assert_eq!(names.len(), all.len());
        assert!(names.iter().all(|n| n.starts_with("earth_data_")));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        SourcesMetrics::record_success("noaa", 0.2, 48);
        SourcesMetrics::record_error("usno", "source_unavailable");
        StoreMetrics::record_persist(1, 0, 2);
    }
}
