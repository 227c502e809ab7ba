//! Deterministic probe for tests

use super::SystemProbe;
use crate::models::{AllocatorStats, CpuSample, MemorySample, NetworkSample};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Probe returning fixed figures, with optional delay and failure
pub struct MockProbe {
    pub cpu: CpuSample,
    pub memory: MemorySample,
    pub tasks: u64,
    pub network: NetworkSample,
    pub allocator: AllocatorStats,
    delay: Duration,
    failing: Mutex<Option<&'static str>>,
    completed: AtomicUsize,
}

impl Default for MockProbe {
    fn default() -> Self {
        Self {
            cpu: CpuSample {
                service_cpu_load: 40.0,
                system_cpu_load: 60.0,
                total_cores: 4.0,
                total_logical_cores: 8.0,
                cores_used_by_service: 3.2,
                cores_used_by_system: 4.8,
            },
            memory: MemorySample {
                total_system_memory: 8e9,
                memory_used_by_system: 4e9,
                available_memory: 4e9,
                memory_used_by_service: 3.2e9,
                service_memory_load: 40.0,
                system_memory_load: 50.0,
                total_swap: 0.0,
                free_swap: 0.0,
            },
            tasks: 50,
            network: NetworkSample {
                bytes_sent: 1_000,
                bytes_received: 2_000,
            },
            allocator: AllocatorStats {
                heap_alloc: 1 << 20,
                heap_sys: 4 << 20,
                total_alloc: 8 << 20,
                mallocs: 100,
                frees: 40,
                heap_objects: 60,
                stack_inuse: 128 << 10,
                pause_total_ns: 0,
            },
            delay: Duration::ZERO,
            failing: Mutex::new(None),
            completed: AtomicUsize::new(0),
        }
    }
}

impl MockProbe {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self, sub_collector: &'static str) -> Self {
        self.set_failing(Some(sub_collector));
        self
    }

    pub fn set_failing(&self, sub_collector: Option<&'static str>) {
        *self.failing.lock().unwrap() = sub_collector;
    }

    /// Sub-collector calls that ran to completion, failed or not
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    async fn sample<T: Send>(&self, name: &'static str, value: T) -> Result<T> {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() == Some(name) {
            bail!("{} probe unavailable", name);
        }
        Ok(value)
    }
}

#[async_trait]
impl SystemProbe for MockProbe {
    async fn cpu(&self) -> Result<CpuSample> {
        self.sample("cpu", self.cpu).await
    }

    async fn memory(&self) -> Result<MemorySample> {
        self.sample("memory", self.memory).await
    }

    async fn tasks(&self) -> Result<u64> {
        self.sample("tasks", self.tasks).await
    }

    async fn network(&self) -> Result<NetworkSample> {
        self.sample("network", self.network).await
    }

    async fn allocator(&self) -> Result<AllocatorStats> {
        self.sample("allocator", self.allocator).await
    }
}
