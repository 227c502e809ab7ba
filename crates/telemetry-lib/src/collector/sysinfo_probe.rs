//! OS-backed probe built on `sysinfo`
//!
//! Refreshes run on the blocking pool. CPU and memory use separate
//! `System` instances so a memory refresh never resets the process CPU
//! baseline in the middle of a sampling window. Overlapping CPU samples
//! queue behind one another so each one measures its own full window.

use super::allocator::{allocator_counters, read_proc_status};
use super::SystemProbe;
use crate::models::{AllocatorStats, CpuSample, MemorySample, NetworkSample};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Networks, Pid, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::debug;

/// Probe reading this process and the host through `sysinfo`
pub struct SysinfoProbe {
    cpu_system: Arc<Mutex<System>>,
    /// Held from the first refresh to the last of one CPU sample
    cpu_window_lock: tokio::sync::Mutex<()>,
    memory_system: Arc<Mutex<System>>,
    networks: Arc<Mutex<Networks>>,
    pid: Pid,
    cpu_window: Duration,
}

impl SysinfoProbe {
    /// Create a probe for the current process
    pub fn new(cpu_window: Duration) -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("Failed to get pid: {}", e))?;
        Ok(Self::for_pid(pid, cpu_window))
    }

    pub fn for_pid(pid: Pid, cpu_window: Duration) -> Self {
        Self {
            cpu_system: Arc::new(Mutex::new(System::new())),
            cpu_window_lock: tokio::sync::Mutex::new(()),
            memory_system: Arc::new(Mutex::new(System::new())),
            networks: Arc::new(Mutex::new(Networks::new_with_refreshed_list())),
            pid,
            cpu_window: cpu_window.max(MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

/// Run `f` against a locked sampler on the blocking pool
async fn with_locked<S, T, F>(sampler: &Arc<Mutex<S>>, f: F) -> Result<T>
where
    S: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut S) -> Result<T> + Send + 'static,
{
    let sampler = Arc::clone(sampler);
    tokio::task::spawn_blocking(move || {
        let mut guard = sampler
            .lock()
            .map_err(|_| anyhow!("sampler lock poisoned"))?;
        f(&mut guard)
    })
    .await
    .context("Sampling task failed")?
}

#[async_trait]
impl SystemProbe for SysinfoProbe {
    async fn cpu(&self) -> Result<CpuSample> {
        let pid = self.pid;
        let _window = self.cpu_window_lock.lock().await;

        with_locked(&self.cpu_system, move |sys: &mut System| {
            sys.refresh_cpu();
            sys.refresh_process(pid);
            Ok(())
        })
        .await?;

        tokio::time::sleep(self.cpu_window).await;

        with_locked(&self.cpu_system, move |sys: &mut System| {
            sys.refresh_cpu();
            if !sys.refresh_process(pid) {
                bail!("process {} not found", pid);
            }

            let logical = sys.cpus().len().max(1) as f64;
            let physical = sys
                .physical_core_count()
                .map(|n| n as f64)
                .unwrap_or(logical);
            let system_cpu_load = sys.global_cpu_info().cpu_usage() as f64;
            // sysinfo reports process usage per core, so 200% means two busy cores
            let per_core = sys
                .process(pid)
                .map(|p| p.cpu_usage() as f64)
                .unwrap_or(0.0);

            Ok(CpuSample {
                service_cpu_load: (per_core / logical).min(100.0),
                system_cpu_load,
                total_cores: physical,
                total_logical_cores: logical,
                cores_used_by_service: per_core / 100.0,
                cores_used_by_system: system_cpu_load / 100.0 * logical,
            })
        })
        .await
    }

    async fn memory(&self) -> Result<MemorySample> {
        let pid = self.pid;

        with_locked(&self.memory_system, move |sys: &mut System| {
            sys.refresh_memory();
            if !sys.refresh_process(pid) {
                bail!("process {} not found", pid);
            }

            let total = sys.total_memory() as f64;
            if total == 0.0 {
                bail!("total system memory reported as zero");
            }
            let used = sys.used_memory() as f64;
            let rss = sys.process(pid).map(|p| p.memory() as f64).unwrap_or(0.0);

            Ok(MemorySample {
                total_system_memory: total,
                memory_used_by_system: used,
                available_memory: sys.available_memory() as f64,
                memory_used_by_service: rss,
                service_memory_load: rss / total * 100.0,
                system_memory_load: used / total * 100.0,
                total_swap: sys.total_swap() as f64,
                free_swap: sys.free_swap() as f64,
            })
        })
        .await
    }

    async fn tasks(&self) -> Result<u64> {
        Ok(super::alive_tasks())
    }

    async fn network(&self) -> Result<NetworkSample> {
        with_locked(&self.networks, |networks: &mut Networks| {
            networks.refresh();

            let mut sample = NetworkSample::default();
            for (_name, data) in networks.iter() {
                sample.bytes_received += data.total_received();
                sample.bytes_sent += data.total_transmitted();
            }
            Ok(sample)
        })
        .await
    }

    async fn allocator(&self) -> Result<AllocatorStats> {
        let counters = allocator_counters();
        let status = read_proc_status().await?;

        if !counters.tracking {
            debug!("Tracking allocator not installed, heap counters are zero");
        }

        Ok(AllocatorStats {
            heap_alloc: counters.allocated,
            heap_sys: status.vm_data.max(counters.allocated),
            total_alloc: counters.total_allocated,
            mallocs: counters.mallocs,
            frees: counters.frees,
            heap_objects: counters.live_objects(),
            stack_inuse: status.vm_stk,
            pause_total_ns: 0,
        })
    }
}
