//! Observability infrastructure for the telemetry agent
//!
//! Provides:
//! - Prometheus metrics about the agent itself (collection and flush latency, rows stored, errors)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, Gauge, Histogram, IntCounter,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
///
/// Collection includes the CPU sampling window, so buckets reach past one second.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 1.5, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AgentMetricsInner {
    collection_latency_seconds: Histogram,
    flush_latency_seconds: Histogram,
    rows_stored: IntCounter,
    collection_errors: IntCounter,
    storage_errors: IntCounter,
    scoring_errors: IntCounter,
    flushes: IntCounter,
    functions_traced: IntCounter,
    health_percent: Gauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            collection_latency_seconds: register_histogram!(
                "telemetry_agent_collection_latency_seconds",
                "Time spent collecting one service snapshot",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            flush_latency_seconds: register_histogram!(
                "telemetry_agent_flush_latency_seconds",
                "Time spent on one collect, score and store cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register flush_latency_seconds"),

            rows_stored: register_int_counter!(
                "telemetry_agent_rows_stored_total",
                "Total number of metric rows written to the time-series store"
            )
            .expect("Failed to register rows_stored"),

            collection_errors: register_int_counter!(
                "telemetry_agent_collection_errors_total",
                "Total number of failed snapshot collections"
            )
            .expect("Failed to register collection_errors"),

            storage_errors: register_int_counter!(
                "telemetry_agent_storage_errors_total",
                "Total number of failed store inserts"
            )
            .expect("Failed to register storage_errors"),

            scoring_errors: register_int_counter!(
                "telemetry_agent_scoring_errors_total",
                "Total number of snapshots that could not be scored"
            )
            .expect("Failed to register scoring_errors"),

            flushes: register_int_counter!(
                "telemetry_agent_flushes_total",
                "Total number of completed flushes"
            )
            .expect("Failed to register flushes"),

            functions_traced: register_int_counter!(
                "telemetry_agent_functions_traced_total",
                "Total number of traced function invocations"
            )
            .expect("Failed to register functions_traced"),

            health_percent: register_gauge!(
                "telemetry_agent_service_health_percent",
                "Most recent health score of the instrumented service"
            )
            .expect("Failed to register health_percent"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner().collection_latency_seconds.observe(duration_secs);
    }

    pub fn observe_flush_latency(&self, duration_secs: f64) {
        self.inner().flush_latency_seconds.observe(duration_secs);
    }

    pub fn inc_rows_stored(&self, rows: u64) {
        self.inner().rows_stored.inc_by(rows);
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors.inc();
    }

    pub fn inc_storage_errors(&self) {
        self.inner().storage_errors.inc();
    }

    pub fn inc_scoring_errors(&self) {
        self.inner().scoring_errors.inc();
    }

    pub fn inc_flushes(&self) {
        self.inner().flushes.inc();
    }

    pub fn inc_functions_traced(&self) {
        self.inner().functions_traced.inc();
    }

    pub fn set_health_percent(&self, percent: f64) {
        self.inner().health_percent.set(percent);
    }
}

/// Structured logger for agent events
///
/// Emits one named `event` per significant lifecycle step so log pipelines
/// can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, sync_frequency: Duration, retention: Duration) {
        info!(
            event = "agent_started",
            service = %self.service_name,
            agent_version = %version,
            sync_frequency_secs = sync_frequency.as_secs(),
            retention_secs = retention.as_secs(),
            "Telemetry agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            service = %self.service_name,
            reason = %reason,
            "Telemetry agent shutting down"
        );
    }

    /// Log a completed flush
    pub fn log_flush(&self, rows: usize, health_percent: Option<f64>, elapsed: Duration) {
        info!(
            event = "flush_completed",
            service = %self.service_name,
            rows = rows,
            health_percent = ?health_percent,
            elapsed_ms = elapsed.as_millis() as u64,
            "Metrics flushed to store"
        );
    }

    /// Log a failed flush
    pub fn log_flush_failure(&self, stage: &str, error: &anyhow::Error) {
        warn!(
            event = "flush_failed",
            service = %self.service_name,
            stage = %stage,
            error = %format!("{:#}", error),
            "Flush failed, next tick will retry"
        );
    }

    /// Log a traced function run
    pub fn log_function_traced(
        &self,
        function: &str,
        execution_time: Duration,
        allocation_delta: u64,
        task_delta: u64,
        artifacts_complete: bool,
    ) {
        if artifacts_complete {
            info!(
                event = "function_traced",
                service = %self.service_name,
                function = %function,
                execution_ms = execution_time.as_secs_f64() * 1000.0,
                allocation_delta = allocation_delta,
                task_delta = task_delta,
                "Function traced"
            );
        } else {
            warn!(
                event = "function_traced",
                service = %self.service_name,
                function = %function,
                execution_ms = execution_time.as_secs_f64() * 1000.0,
                allocation_delta = allocation_delta,
                task_delta = task_delta,
                "Function traced with missing profile artifacts"
            );
        }
    }

    /// Log a store purge
    pub fn log_purge(&self, success: bool) {
        if success {
            info!(
                event = "store_purged",
                service = %self.service_name,
                "Stored metrics purged"
            );
        } else {
            warn!(
                event = "store_purge_failed",
                service = %self.service_name,
                "Failed to purge stored metrics"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_metrics_creation() {
        let metrics = AgentMetrics::new();
        let other = metrics.clone();

        metrics.observe_collection_latency(0.001);
        metrics.observe_flush_latency(1.2);
        metrics.inc_rows_stored(27);
        other.inc_collection_errors();
        other.inc_storage_errors();
        other.inc_functions_traced();
        other.set_health_percent(88.0);
    }

    #[test]
    fn test_metrics_exposed_through_registry() {
        AgentMetrics::new().inc_flushes();

        let names: Vec<String> = prometheus::gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.iter().any(|n| n == "telemetry_agent_flushes_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("checkout");
        assert_eq!(logger.service_name, "checkout");
    }
}
