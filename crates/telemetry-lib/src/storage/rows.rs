//! Decomposition of a snapshot into stored metric rows

use crate::models::{Label, MetricRow, ServiceSnapshot};
use crate::scoring::HealthScore;

/// Metric names written by the agent
pub mod names {
    /// Live task count; the name is kept for existing dashboards
    pub const TASKS: &str = "goroutines";
    pub const REQUEST_COUNT: &str = "request_count";
    pub const OVERALL_LOAD: &str = "overall_load_of_service";
    pub const SERVICE_CPU_LOAD: &str = "service_cpu_load";
    pub const SYSTEM_CPU_LOAD: &str = "system_cpu_load";
    pub const SERVICE_MEMORY_LOAD: &str = "service_memory_load";
    pub const SYSTEM_MEMORY_LOAD: &str = "system_memory_load";
    pub const TOTAL_CORES: &str = "total_cores";
    pub const TOTAL_LOGICAL_CORES: &str = "total_logical_cores";
    pub const CORES_USED_BY_SERVICE: &str = "cores_used_by_service";
    pub const CORES_USED_BY_SYSTEM: &str = "cores_used_by_system";
    pub const TOTAL_SYSTEM_MEMORY: &str = "total_system_memory";
    pub const MEMORY_USED_BY_SYSTEM: &str = "memory_used_by_system";
    pub const MEMORY_USED_BY_SERVICE: &str = "memory_used_by_service";
    pub const AVAILABLE_MEMORY: &str = "available_memory";
    pub const GC_PAUSE_DURATION: &str = "gc_pause_duration";
    pub const STACK_MEMORY_USAGE: &str = "stack_memory_usage";
    pub const BYTES_SENT: &str = "bytes_sent";
    pub const BYTES_RECEIVED: &str = "bytes_received";
    pub const OVERALL_HEALTH_PERCENT: &str = "overall_health_percent";

    pub const HEAP_ALLOC: &str = "heap_alloc";
    pub const HEAP_SYS: &str = "heap_sys";
    pub const TOTAL_ALLOC: &str = "total_alloc";
    pub const MALLOCS: &str = "mallocs";
    pub const FREES: &str = "frees";
    pub const HEAP_OBJECTS: &str = "heap_objects";
    pub const STACK_INUSE: &str = "stack_inuse";
    pub const PAUSE_TOTAL_NS: &str = "pause_total_ns";
}

/// Flatten a snapshot into rows sharing `timestamp` and the host label
///
/// The health row is only written when a score is available.
pub fn snapshot_rows(
    snapshot: &ServiceSnapshot,
    health: Option<&HealthScore>,
    host: &str,
    timestamp: i64,
) -> Vec<MetricRow> {
    let cpu = &snapshot.cpu;
    let memory = &snapshot.memory;
    let alloc = &snapshot.allocator;
    let network = &snapshot.network;

    let mut values: Vec<(&str, f64)> = vec![
        (names::TASKS, snapshot.tasks as f64),
        (names::REQUEST_COUNT, snapshot.requests.request_count as f64),
        (names::OVERALL_LOAD, snapshot.overall_load()),
        (names::SERVICE_CPU_LOAD, cpu.service_cpu_load),
        (names::SYSTEM_CPU_LOAD, cpu.system_cpu_load),
        (names::SERVICE_MEMORY_LOAD, memory.service_memory_load),
        (names::SYSTEM_MEMORY_LOAD, memory.system_memory_load),
        (names::TOTAL_CORES, cpu.total_cores),
        (names::TOTAL_LOGICAL_CORES, cpu.total_logical_cores),
        (names::CORES_USED_BY_SERVICE, cpu.cores_used_by_service),
        (names::CORES_USED_BY_SYSTEM, cpu.cores_used_by_system),
        (names::TOTAL_SYSTEM_MEMORY, memory.total_system_memory),
        (names::MEMORY_USED_BY_SYSTEM, memory.memory_used_by_system),
        (names::MEMORY_USED_BY_SERVICE, memory.memory_used_by_service),
        (names::AVAILABLE_MEMORY, memory.available_memory),
        (names::GC_PAUSE_DURATION, alloc.pause_total_ns as f64),
        (names::STACK_MEMORY_USAGE, alloc.stack_inuse as f64),
        (names::BYTES_SENT, network.bytes_sent as f64),
        (names::BYTES_RECEIVED, network.bytes_received as f64),
        (names::HEAP_ALLOC, alloc.heap_alloc as f64),
        (names::HEAP_SYS, alloc.heap_sys as f64),
        (names::TOTAL_ALLOC, alloc.total_alloc as f64),
        (names::MALLOCS, alloc.mallocs as f64),
        (names::FREES, alloc.frees as f64),
        (names::HEAP_OBJECTS, alloc.heap_objects as f64),
        (names::STACK_INUSE, alloc.stack_inuse as f64),
        (names::PAUSE_TOTAL_NS, alloc.pause_total_ns as f64),
    ];

    if let Some(health) = health {
        values.push((names::OVERALL_HEALTH_PERCENT, health.percent));
    }

    let labels = vec![Label::host(host)];
    values
        .into_iter()
        .map(|(metric, value)| MetricRow::new(metric, labels.clone(), timestamp, value))
        .collect()
}
