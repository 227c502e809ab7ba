//! Core data models for the telemetry agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// CPU figures sampled over one measurement window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSample {
    /// Process CPU as a share of the whole machine (0-100)
    pub service_cpu_load: f64,
    /// OS-wide CPU usage (0-100)
    pub system_cpu_load: f64,
    /// Physical core count
    pub total_cores: f64,
    /// Logical core count
    pub total_logical_cores: f64,
    pub cores_used_by_service: f64,
    pub cores_used_by_system: f64,
}

/// Memory figures in bytes, plus loads as percentages of total memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub total_system_memory: f64,
    pub memory_used_by_system: f64,
    pub available_memory: f64,
    /// Resident set size of this process
    pub memory_used_by_service: f64,
    pub service_memory_load: f64,
    pub system_memory_load: f64,
    pub total_swap: f64,
    pub free_swap: f64,
}

/// Allocator counters
///
/// Mirrors what a managed-memory runtime would expose; sourced from
/// [`crate::collector::TrackingAllocator`] and `/proc/self/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStats {
    /// Bytes currently allocated
    pub heap_alloc: u64,
    /// Bytes reserved from the OS for the heap
    pub heap_sys: u64,
    /// Cumulative bytes allocated
    pub total_alloc: u64,
    pub mallocs: u64,
    pub frees: u64,
    /// Live allocations
    pub heap_objects: u64,
    /// Stack bytes in use by the main thread
    pub stack_inuse: u64,
    /// Collector pause total; always zero without a tracing collector
    pub pause_total_ns: u64,
}

/// Cumulative network counters across all interfaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSample {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Requests the host reported through [`crate::agent::TelemetryAgent::record_request`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestStats {
    pub request_count: u64,
    pub total_duration_secs: f64,
}

/// Point-in-time bundle of everything sampled in one collection cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    /// Unix seconds at which the snapshot was assembled
    pub timestamp: i64,
    /// Live async tasks on the runtime
    pub tasks: u64,
    pub requests: RequestStats,
    pub cpu: CpuSample,
    pub memory: MemorySample,
    pub allocator: AllocatorStats,
    pub network: NetworkSample,
}

impl ServiceSnapshot {
    /// Blend of service CPU and memory load, capped at 100
    pub fn overall_load(&self) -> f64 {
        (0.5 * self.cpu.service_cpu_load + 0.5 * self.memory.service_memory_load).min(100.0)
    }
}

/// A single label attached to every stored row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The host label used for every row this agent writes
    pub fn host(value: impl Into<String>) -> Self {
        Self::new("host", value)
    }
}

/// One stored value with its timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: i64,
    pub value: f64,
}

/// A metric measurement ready for the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub metric: String,
    pub labels: Vec<Label>,
    pub data_point: DataPoint,
}

impl MetricRow {
    pub fn new(metric: impl Into<String>, labels: Vec<Label>, timestamp: i64, value: f64) -> Self {
        Self {
            metric: metric.into(),
            labels,
            data_point: DataPoint { timestamp, value },
        }
    }
}

/// Statistics for one traced function, keyed by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionProfile {
    pub name: String,
    pub last_ran_at: DateTime<Utc>,
    /// Net heap growth across the run, in bytes
    pub allocation_delta: u64,
    /// Extra tasks alive after the function returned
    pub task_delta: u64,
    pub execution_time: Duration,
    /// `None` when the execution-time artifact could not be produced
    pub cpu_profile_path: Option<PathBuf>,
    /// `None` when the heap artifact could not be produced
    pub heap_profile_path: Option<PathBuf>,
}

/// Service identity and first-seen start time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_name: String,
    pub service_start_time: DateTime<Utc>,
    pub agent_version: String,
    pub process_id: u32,
}
