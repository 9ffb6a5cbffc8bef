//! Observability metrics for the downloader
//!
//! Counters and histograms for remote calls, retries, persisted units and
//! per-item outcomes. Recording is always safe: without [`init_metrics`] the
//! `metrics` macros write to a no-op recorder.
//!
//! ## Exported series
//!
//! - `remote_calls_total{operation, outcome}`
//! - `remote_call_duration_seconds{operation}`
//! - `remote_retries_total{operation}` and `retry_backoff_duration_seconds`
//! - `remote_calls_exhausted_total{operation}`
//! - `units_written_total{kind}` (`kind` is `layout` or `fallback`)
//! - `items_completed_total`, `items_failed_total{reason}`, `items_skipped_total`

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<AtomicBool> = Lazy::new(|| AtomicBool::new(false));

/// Correlation ID generator for remote call tracing
static CORRELATION_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));

/// Errors raised while installing the exporter
#[derive(Debug, thiserror::Error)]
#[error("failed to install Prometheus exporter on {addr}: {message}")]
pub struct MetricsError {
    addr: SocketAddr,
    message: String,
}

/// Initialize metrics with a Prometheus scrape endpoint on `addr`
///
/// Idempotent; later calls are ignored.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        METRICS_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(MetricsError {
            addr,
            message: e.to_string(),
        });
    }

    describe_counter!(
        "remote_calls_total",
        Unit::Count,
        "Remote call attempts by operation and outcome"
    );
    describe_histogram!(
        "remote_call_duration_seconds",
        Unit::Seconds,
        "Duration of single remote call attempts"
    );
    describe_counter!(
        "remote_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_counter!(
        "remote_calls_exhausted_total",
        Unit::Count,
        "Remote calls abandoned after all attempts failed"
    );
    describe_counter!(
        "units_written_total",
        Unit::Count,
        "Recording units persisted, by layout or fallback"
    );
    describe_counter!(
        "items_completed_total",
        Unit::Count,
        "Work items completed"
    );
    describe_counter!(
        "items_failed_total",
        Unit::Count,
        "Work items that failed"
    );
    describe_counter!(
        "items_skipped_total",
        Unit::Count,
        "Work items skipped because nothing could be fetched"
    );

    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if the exporter was installed
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.load(Ordering::SeqCst)
}

/// Generate a new correlation ID for remote call tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("call-{id:08x}")
}

/// Timing and outcome of one remote call attempt
pub struct RemoteCallMetrics {
    operation: &'static str,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl RemoteCallMetrics {
    /// Start recording an attempt
    pub fn start(operation: &'static str, attempt: u32) -> Self {
        let correlation_id = generate_correlation_id();
        debug!(
            correlation_id = %correlation_id,
            operation,
            attempt,
            "Starting remote call"
        );
        Self {
            operation,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    fn record(&self, outcome: &'static str) -> Duration {
        let duration = self.start_time.elapsed();
        counter!(
            "remote_calls_total",
            "operation" => self.operation,
            "outcome" => outcome,
        )
        .increment(1);
        histogram!(
            "remote_call_duration_seconds",
            "operation" => self.operation,
        )
        .record(duration.as_secs_f64());
        duration
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        let duration = self.record("success");
        debug!(
            correlation_id = %self.correlation_id,
            operation = self.operation,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Remote call completed"
        );
    }

    /// Record a failed attempt, labelled by error kind
    pub fn record_error(&self, kind: &'static str) {
        let duration = self.record(kind);
        debug!(
            correlation_id = %self.correlation_id,
            operation = self.operation,
            attempt = self.attempt,
            error_kind = kind,
            duration_ms = duration.as_millis(),
            "Remote call failed"
        );
    }

    /// Correlation ID for this attempt
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a retry backoff
pub fn record_retry_backoff(operation: &'static str, duration: Duration) {
    counter!("remote_retries_total", "operation" => operation).increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());
}

/// Record a call abandoned after all attempts
pub fn record_exhausted(operation: &'static str) {
    counter!("remote_calls_exhausted_total", "operation" => operation).increment(1);
}

/// Record a persisted unit
pub fn record_unit_written(fallback: bool) {
    let kind = if fallback { "fallback" } else { "layout" };
    counter!("units_written_total", "kind" => kind).increment(1);
}

/// Per-item metrics
pub struct ItemMetrics {
    source_reference: String,
    start_time: Instant,
}

impl ItemMetrics {
    /// Start tracking a work item
    pub fn start(source_reference: impl Into<String>) -> Self {
        Self {
            source_reference: source_reference.into(),
            start_time: Instant::now(),
        }
    }

    /// Record completion with the number of units persisted
    pub fn record_success(&self, units: usize) {
        counter!("items_completed_total").increment(1);
        info!(
            source = %self.source_reference,
            units,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Item completed"
        );
    }

    /// Record an item with nothing to persist
    pub fn record_skipped(&self) {
        counter!("items_skipped_total").increment(1);
        warn!(
            source = %self.source_reference,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Item skipped, nothing was fetched"
        );
    }

    /// Record a failed item
    pub fn record_failure(&self, reason: &'static str, error: &str) {
        counter!("items_failed_total", "reason" => reason).increment(1);
        warn!(
            source = %self.source_reference,
            reason,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Item failed"
        );
    }
}
