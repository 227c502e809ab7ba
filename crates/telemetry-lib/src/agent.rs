//! Agent context
//!
//! [`TelemetryAgent`] owns every piece of agent state: live thresholds, the
//! collector, the store, the scheduler, the profile table and the service
//! cache. Hosts create one, call [`start`](TelemetryAgent::start) and share
//! it behind an `Arc`.

use crate::collector::{SnapshotCollector, SysinfoProbe, SystemProbe};
use crate::config::AgentConfig;
use crate::health::{components, HealthRegistry};
use crate::models::{DataPoint, FunctionProfile, ServiceInfo, ServiceSnapshot};
use crate::observability::StructuredLogger;
use crate::profiler::FunctionProfiler;
use crate::scoring::{score_snapshot, HealthScore, ScoreError, ThresholdConfig, Thresholds};
use crate::service::{uptime, RequestCounter, ServiceInfoCache};
use crate::storage::{SeriesStore, StorageError, StoreOptions};
use crate::sync::{Flusher, SchedulerState, SyncScheduler};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// In-process telemetry agent
pub struct TelemetryAgent {
    config: AgentConfig,
    thresholds: ThresholdConfig,
    collector: SnapshotCollector,
    store: Arc<SeriesStore>,
    scheduler: SyncScheduler,
    profiler: FunctionProfiler,
    service_cache: Mutex<ServiceInfoCache>,
    service_info: Mutex<Option<ServiceInfo>>,
    requests: RequestCounter,
    health: HealthRegistry,
    logger: StructuredLogger,
    started: AtomicBool,
}

impl TelemetryAgent {
    /// Build an agent sampling the current process through `sysinfo`
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate().context("Invalid agent configuration")?;
        let probe = SysinfoProbe::new(config.cpu_sample_window())
            .context("Failed to create system probe")?;
        Ok(Self::with_probe(config, Arc::new(probe)))
    }

    /// Build an agent around any [`SystemProbe`]
    pub fn with_probe(config: AgentConfig, probe: Arc<dyn SystemProbe>) -> Self {
        let logger = StructuredLogger::new(&config.service_name);
        let health = HealthRegistry::new();
        let requests = RequestCounter::new();

        let thresholds = config.thresholds.apply(Thresholds::default());
        let thresholds = match thresholds.validate() {
            Ok(()) => thresholds,
            Err(e) => {
                warn!(error = %e, "Configured thresholds rejected, using defaults");
                Thresholds::default()
            }
        };
        let thresholds = ThresholdConfig::new(thresholds);

        let collector = SnapshotCollector::new(probe, requests.clone());
        let store = Arc::new(SeriesStore::new(
            config.store_dir(),
            StoreOptions::with_retention(config.retention()),
        ));
        let flusher = Flusher::new(
            collector.clone(),
            thresholds.clone(),
            Arc::clone(&store),
            config.host_label.clone(),
            health.clone(),
            logger.clone(),
        );

        Self {
            thresholds,
            collector,
            store,
            scheduler: SyncScheduler::new(Arc::new(flusher)),
            profiler: FunctionProfiler::new(config.profiles_dir(), logger.clone()),
            service_cache: Mutex::new(ServiceInfoCache::open(&config.data_dir)),
            service_info: Mutex::new(None),
            requests,
            health,
            logger,
            started: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Component health shared with the host's probes
    pub fn health_registry(&self) -> &HealthRegistry {
        &self.health
    }

    /// Flush once, start the sync schedule and check the store opened
    ///
    /// Failures are logged and reflected in component health, never returned.
    /// Calling this more than once has no effect.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Telemetry agent already started");
            return;
        }

        self.health.register_all().await;
        self.service_info();

        match self.scheduler.start(&self.config.sync_frequency).await {
            Ok(_) => self.health.set_healthy(components::SCHEDULER).await,
            Err(e) => {
                warn!(error = %e, "Sync scheduler not started");
                self.health
                    .set_unhealthy(components::SCHEDULER, e.to_string())
                    .await;
            }
        }

        // The initial flush already tried to open the store
        match self.store.handle().await {
            Ok(_) => self.health.set_healthy(components::STORE).await,
            Err(e) => {
                warn!(
                    error = %e,
                    path = %self.store.dir().display(),
                    "Failed to open time-series store, metrics will not be persisted"
                );
                self.health
                    .set_unhealthy(components::STORE, e.to_string())
                    .await;
            }
        }

        self.health.set_healthy(components::PROFILER).await;
        self.health.set_ready(true).await;
        self.logger.log_startup(
            AGENT_VERSION,
            self.config.sync_frequency(),
            self.config.retention(),
        );
    }

    /// Stop the schedule, waiting for an in-flight flush, then close the store
    pub async fn shutdown(&self, reason: &str) {
        self.logger.log_shutdown(reason);
        self.health.set_ready(false).await;
        self.scheduler.cancel_and_wait().await;

        if let Err(e) = self.store.close().await {
            warn!(error = %e, "Failed to close time-series store");
        }
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Collect a fresh snapshot outside the schedule
    pub async fn snapshot(&self) -> Result<ServiceSnapshot> {
        self.collector.collect().await
    }

    /// Score a fresh snapshot against the live thresholds
    pub async fn health(&self) -> Result<HealthScore> {
        let snapshot = self.snapshot().await?;
        Ok(self.score(&snapshot).await?)
    }

    pub async fn score(&self, snapshot: &ServiceSnapshot) -> Result<HealthScore, ScoreError> {
        score_snapshot(snapshot, &self.thresholds.get().await)
    }

    /// Replace the live thresholds; invalid values leave them unchanged
    pub async fn configure_thresholds(&self, thresholds: Thresholds) -> Result<(), ScoreError> {
        self.thresholds.configure(thresholds).await?;
        info!(thresholds = ?thresholds, "Health thresholds updated");
        Ok(())
    }

    pub async fn thresholds(&self) -> Thresholds {
        self.thresholds.get().await
    }

    /// Stored points of `metric` for this agent's host, bounds inclusive
    pub async fn data_points(
        &self,
        metric: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<DataPoint>, StorageError> {
        self.store
            .data_points(metric, &self.config.host_label, start, end)
            .await
    }

    /// Run `f` on the calling thread and record its profile as `name`
    pub fn trace<F, R>(&self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.profiler.trace(name, f)
    }

    /// Run `f` and record its profile under its type name
    pub fn trace_fn<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.profiler.trace_fn(f)
    }

    pub fn function_profile(&self, name: &str) -> Option<FunctionProfile> {
        self.profiler.profile(name)
    }

    pub fn function_profiles(&self) -> Vec<FunctionProfile> {
        self.profiler.profiles()
    }

    /// Delete every stored point; the next flush starts an empty store
    pub async fn purge(&self) -> Result<(), StorageError> {
        let result = self.store.purge().await;
        self.logger.log_purge(result.is_ok());
        if result.is_ok() {
            self.health.set_healthy(components::STORE).await;
        }
        result
    }

    /// Count one handled request towards the `request_count` row
    pub fn record_request(&self, duration: Duration) {
        self.requests.record(duration);
    }

    /// Identity of the instrumented service
    ///
    /// The start time is the first one ever recorded for this service name in
    /// the data directory, so it survives restarts.
    pub fn service_info(&self) -> ServiceInfo {
        let mut cached = match self.service_info.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(info) = cached.as_ref() {
            return info.clone();
        }

        let now = Utc::now();
        let recorded = match self.service_cache.lock() {
            Ok(mut cache) => cache.record_start(&self.config.service_name, now),
            Err(poisoned) => poisoned
                .into_inner()
                .record_start(&self.config.service_name, now),
        };

        let info = recorded.unwrap_or_else(|e| {
            warn!(error = %format!("{:#}", e), "Failed to persist service start time");
            ServiceInfo {
                service_name: self.config.service_name.clone(),
                service_start_time: now,
                agent_version: AGENT_VERSION.to_string(),
                process_id: std::process::id(),
            }
        });
        *cached = Some(info.clone());
        info
    }

    /// Time since the service was first seen
    pub fn uptime(&self) -> Duration {
        uptime(self.service_info().service_start_time, Utc::now())
    }
}
