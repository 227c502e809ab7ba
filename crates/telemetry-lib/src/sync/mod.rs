//! Periodic synchronization of snapshots into the time-series store
//!
//! This module provides:
//! - [`Flusher`]: one collect, score and insert cycle
//! - [`SyncScheduler`]: a cancellable repeating timer driving a [`FlushTarget`]

mod scheduler;


pub use scheduler::{SchedulerState, SyncScheduler};

use crate::collector::SnapshotCollector;
use crate::health::{components, HealthRegistry};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::scoring::{score_snapshot, HealthScore, ThresholdConfig};
use crate::storage::{snapshot_rows, SeriesStore};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Outcome of one successful flush
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub timestamp: i64,
    pub rows: usize,
    /// `None` when the snapshot could not be scored
    pub health: Option<HealthScore>,
}

/// Something the scheduler can flush
#[async_trait]
pub trait FlushTarget: Send + Sync + 'static {
    async fn flush(&self) -> Result<FlushReport>;
}

/// Collects a snapshot, scores it and writes the rows to the store
#[derive(Clone)]
pub struct Flusher {
    collector: SnapshotCollector,
    thresholds: ThresholdConfig,
    store: Arc<SeriesStore>,
    host: String,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl Flusher {
    pub fn new(
        collector: SnapshotCollector,
        thresholds: ThresholdConfig,
        store: Arc<SeriesStore>,
        host: impl Into<String>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            collector,
            thresholds,
            store,
            host: host.into(),
            health,
            metrics: AgentMetrics::new(),
            logger,
        }
    }
}

#[async_trait]
impl FlushTarget for Flusher {
    async fn flush(&self) -> Result<FlushReport> {
        let start = Instant::now();

        let snapshot = match self.collector.collect().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.health
                    .set_degraded(components::COLLECTOR, format!("{:#}", e))
                    .await;
                self.logger.log_flush_failure("collect", &e);
                return Err(e);
            }
        };
        self.health.set_healthy(components::COLLECTOR).await;

        // A bad threshold only costs the health row
        let thresholds = self.thresholds.get().await;
        let health = match score_snapshot(&snapshot, &thresholds) {
            Ok(score) => {
                self.metrics.set_health_percent(score.percent);
                Some(score)
            }
            Err(e) => {
                self.metrics.inc_scoring_errors();
                warn!(error = %e, "Snapshot could not be scored, skipping health row");
                None
            }
        };

        let timestamp = chrono::Utc::now().timestamp();
        let rows = snapshot_rows(&snapshot, health.as_ref(), &self.host, timestamp);

        if let Err(e) = self.store.insert(&rows).await {
            let e = anyhow::Error::new(e).context("Failed to store snapshot rows");
            self.health
                .set_degraded(components::STORE, format!("{:#}", e))
                .await;
            self.logger.log_flush_failure("store", &e);
            return Err(e);
        }
        self.health.set_healthy(components::STORE).await;

        let elapsed = start.elapsed();
        self.metrics.inc_flushes();
        self.metrics.observe_flush_latency(elapsed.as_secs_f64());
        self.logger
            .log_flush(rows.len(), health.as_ref().map(|h| h.percent), elapsed);

        Ok(FlushReport {
            timestamp,
            rows: rows.len(),
            health,
        })
    }
}
