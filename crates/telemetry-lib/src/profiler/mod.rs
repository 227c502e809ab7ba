//! Function profiler
//!
//! [`FunctionProfiler::trace`] wraps a closure and runs it on the caller's
//! thread. Around the call it records allocator and task counters, samples
//! execution time into a flamegraph and writes a heap snapshot, then keeps
//! the latest [`FunctionProfile`] per function name.
//!
//! Artifacts land in the profiles directory as `<name>_cpu.svg` and
//! `<name>_mem.json`. Reruns overwrite both.

pub mod artifacts;

use crate::collector::{alive_tasks, allocator_counters};
use crate::models::FunctionProfile;
use crate::observability::{AgentMetrics, StructuredLogger};
use artifacts::{file_stem, write_heap_snapshot, CpuRecorder, HeapSnapshot, CPU_SAMPLE_FREQUENCY};
use chrono::Utc;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Keeps the latest profile of every traced function
#[derive(Clone)]
pub struct FunctionProfiler {
    dir: PathBuf,
    profiles: Arc<DashMap<String, FunctionProfile>>,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl FunctionProfiler {
    pub fn new(dir: impl Into<PathBuf>, logger: StructuredLogger) -> Self {
        Self {
            dir: dir.into(),
            profiles: Arc::new(DashMap::new()),
            metrics: AgentMetrics::new(),
            logger,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run `f` under measurement and record its profile as `name`
    ///
    /// Blocks for as long as `f` runs. Artifact failures are logged and
    /// leave the matching path unset; `f` always runs and its result is
    /// always returned.
    pub fn trace<F, R>(&self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let stem = file_stem(name);
        let dir_ready = match std::fs::create_dir_all(&self.dir) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    function = %name,
                    dir = %self.dir.display(),
                    error = %e,
                    "Profiles directory unavailable, artifacts skipped"
                );
                false
            }
        };

        let tasks_before = alive_tasks();
        let heap_before = allocator_counters();

        let recorder = if dir_ready {
            match CpuRecorder::start(CPU_SAMPLE_FREQUENCY) {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    warn!(function = %name, error = %format!("{:#}", e), "Execution-time recorder not started");
                    None
                }
            }
        } else {
            None
        };

        let started = Instant::now();
        let result = f();
        let execution_time = started.elapsed();

        let cpu_profile_path = recorder.and_then(|recorder| {
            let path = self.dir.join(format!("{}_cpu.svg", stem));
            recorder
                .finish(&path)
                .map_err(|e| {
                    warn!(function = %name, error = %format!("{:#}", e), "Execution-time profile not written")
                })
                .ok()
        });

        let heap_stopped = allocator_counters();
        let heap_profile_path = if dir_ready {
            let path = self.dir.join(format!("{}_mem.json", stem));
            let snapshot = HeapSnapshot {
                function: name,
                captured_at: Utc::now(),
                before: heap_before,
                after: heap_stopped,
            };
            write_heap_snapshot(&path, &snapshot)
                .map_err(|e| {
                    warn!(function = %name, error = %format!("{:#}", e), "Heap profile not written")
                })
                .ok()
        } else {
            None
        };

        let tasks_after = alive_tasks();
        let heap_after = allocator_counters();

        let profile = FunctionProfile {
            name: name.to_string(),
            last_ran_at: Utc::now(),
            allocation_delta: heap_after.allocated.saturating_sub(heap_before.allocated),
            task_delta: tasks_after.saturating_sub(tasks_before),
            execution_time,
            cpu_profile_path,
            heap_profile_path,
        };

        self.metrics.inc_functions_traced();
        self.logger.log_function_traced(
            name,
            profile.execution_time,
            profile.allocation_delta,
            profile.task_delta,
            profile.cpu_profile_path.is_some() && profile.heap_profile_path.is_some(),
        );
        self.profiles.insert(name.to_string(), profile);

        result
    }

    /// Like [`trace`](Self::trace), named after the closure's type
    ///
    /// Path separators in the type name become `-`, so a closure defined in
    /// `shop::checkout` is recorded as `shop-checkout-{{closure}}`.
    pub fn trace_fn<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let name = std::any::type_name::<F>().replace("::", "-");
        self.trace(&name, f)
    }

    /// Latest profile recorded under `name`
    pub fn profile(&self, name: &str) -> Option<FunctionProfile> {
        self.profiles.get(name).map(|entry| entry.value().clone())
    }

    /// Every recorded profile, sorted by name
    pub fn profiles(&self) -> Vec<FunctionProfile> {
        let mut profiles: Vec<FunctionProfile> = self
            .profiles
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Serialises tests that trace, since only one recorder can run at a time
#[cfg(test)]
pub(crate) fn recorder_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests;
