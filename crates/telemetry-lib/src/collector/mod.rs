//! Snapshot collection
//!
//! A [`SnapshotCollector`] fans out one task per sub-collector of a
//! [`SystemProbe`] and joins on all of them before assembling a
//! [`ServiceSnapshot`]. A failing sub-collector never cancels its siblings,
//! but it does fail the whole cycle.

mod allocator;
mod sysinfo_probe;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use allocator::{
    allocator_counters, parse_proc_status, read_proc_status, AllocatorCounters, ProcStatus,
    TrackingAllocator,
};
pub use sysinfo_probe::SysinfoProbe;

use crate::models::{AllocatorStats, CpuSample, MemorySample, NetworkSample, ServiceSnapshot};
use crate::observability::AgentMetrics;
use crate::service::RequestCounter;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, warn};

pub use async_trait::async_trait;

/// Source of the raw figures that make up a snapshot
#[async_trait]
pub trait SystemProbe: Send + Sync + 'static {
    /// System and process CPU over one sampling window
    async fn cpu(&self) -> Result<CpuSample>;

    /// System memory totals and process resident set size
    async fn memory(&self) -> Result<MemorySample>;

    /// Live async tasks on the current runtime
    async fn tasks(&self) -> Result<u64>;

    /// Cumulative bytes across all network interfaces
    async fn network(&self) -> Result<NetworkSample>;

    /// Allocator counters
    async fn allocator(&self) -> Result<AllocatorStats>;
}

/// Collects a [`ServiceSnapshot`] by running every sub-collector concurrently
#[derive(Clone)]
pub struct SnapshotCollector {
    probe: Arc<dyn SystemProbe>,
    requests: RequestCounter,
    metrics: AgentMetrics,
}

impl SnapshotCollector {
    pub fn new(probe: Arc<dyn SystemProbe>, requests: RequestCounter) -> Self {
        Self {
            probe,
            requests,
            metrics: AgentMetrics::new(),
        }
    }

    /// Collect one snapshot
    ///
    /// Returns once every sub-collector has finished. The error names the
    /// first failed sub-collector in a fixed order.
    pub async fn collect(&self) -> Result<ServiceSnapshot> {
        let start = Instant::now();

        let cpu = self.spawn(|probe| async move { probe.cpu().await });
        let memory = self.spawn(|probe| async move { probe.memory().await });
        let tasks = self.spawn(|probe| async move { probe.tasks().await });
        let network = self.spawn(|probe| async move { probe.network().await });
        let allocator = self.spawn(|probe| async move { probe.allocator().await });

        let (cpu, memory, tasks, network, allocator) =
            tokio::join!(cpu, memory, tasks, network, allocator);

        let result = (|| -> Result<ServiceSnapshot> {
            Ok(ServiceSnapshot {
                timestamp: chrono::Utc::now().timestamp(),
                tasks: joined("tasks", tasks)?,
                requests: self.requests.stats(),
                cpu: joined("cpu", cpu)?,
                memory: joined("memory", memory)?,
                allocator: joined("allocator", allocator)?,
                network: joined("network", network)?,
            })
        })();

        let elapsed = start.elapsed();
        self.metrics.observe_collection_latency(elapsed.as_secs_f64());

        match &result {
            Ok(snapshot) => debug!(
                elapsed_ms = elapsed.as_millis(),
                tasks = snapshot.tasks,
                service_cpu_load = snapshot.cpu.service_cpu_load,
                service_memory_load = snapshot.memory.service_memory_load,
                "Snapshot collected"
            ),
            Err(e) => {
                self.metrics.inc_collection_errors();
                warn!(error = %e, elapsed_ms = elapsed.as_millis(), "Snapshot collection failed");
            }
        }

        result
    }

    fn spawn<T, F, Fut>(&self, f: F) -> tokio::task::JoinHandle<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn SystemProbe>) -> Fut,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        tokio::spawn(f(Arc::clone(&self.probe)))
    }
}

/// Live tasks on the current tokio runtime; zero outside a runtime
pub fn alive_tasks() -> u64 {
    tokio::runtime::Handle::try_current()
        .map(|handle| handle.metrics().num_alive_tasks() as u64)
        .unwrap_or(0)
}

fn joined<T>(name: &str, result: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    match result {
        Ok(inner) => inner.with_context(|| format!("{} sub-collector failed", name)),
        Err(e) if e.is_panic() => Err(anyhow!("{} sub-collector panicked", name)),
        Err(e) => Err(anyhow!("{} sub-collector was cancelled: {}", name, e)),
    }
}
