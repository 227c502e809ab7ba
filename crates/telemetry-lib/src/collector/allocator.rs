//! Allocator accounting
//!
//! Rust has no managed heap to ask for statistics, so the host opts in by
//! installing [`TrackingAllocator`] as its global allocator:
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: telemetry_lib::collector::TrackingAllocator =
//!     telemetry_lib::collector::TrackingAllocator::system();
//! ```
//!
//! Without it the counters stay at zero. Reserved heap and stack figures
//! come from `/proc/self/status` on Linux.

use anyhow::{Context, Result};
use std::alloc::{GlobalAlloc, Layout, System};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static ALLOCATED: AtomicU64 = AtomicU64::new(0);
static TOTAL_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static MALLOCS: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Global allocator wrapper that counts allocations
pub struct TrackingAllocator<A = System> {
    inner: A,
}

impl TrackingAllocator<System> {
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A> TrackingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

#[inline]
fn record_alloc(size: usize) {
    let size = size as u64;
    ALLOCATED.fetch_add(size, Ordering::Relaxed);
    TOTAL_ALLOCATED.fetch_add(size, Ordering::Relaxed);
    MALLOCS.fetch_add(1, Ordering::Relaxed);
    if !INSTALLED.load(Ordering::Relaxed) {
        INSTALLED.store(true, Ordering::Relaxed);
    }
}

#[inline]
fn record_free(size: usize) {
    ALLOCATED.fetch_sub(size as u64, Ordering::Relaxed);
    FREES.fetch_add(1, Ordering::Relaxed);
}

// SAFETY: every call is forwarded unchanged to the wrapped allocator; the
// wrapper only updates atomics, which never allocate.
unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc_zeroed(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.dealloc(ptr, layout);
        record_free(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            record_free(layout.size());
            record_alloc(new_size);
        }
        new_ptr
    }
}

/// Point-in-time copy of the allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocatorCounters {
    pub allocated: u64,
    pub total_allocated: u64,
    pub mallocs: u64,
    pub frees: u64,
    /// False until the tracking allocator has served an allocation
    pub tracking: bool,
}

impl AllocatorCounters {
    pub fn live_objects(&self) -> u64 {
        self.mallocs.saturating_sub(self.frees)
    }
}

pub fn allocator_counters() -> AllocatorCounters {
    AllocatorCounters {
        allocated: ALLOCATED.load(Ordering::Relaxed),
        total_allocated: TOTAL_ALLOCATED.load(Ordering::Relaxed),
        mallocs: MALLOCS.load(Ordering::Relaxed),
        frees: FREES.load(Ordering::Relaxed),
        tracking: INSTALLED.load(Ordering::Relaxed),
    }
}

/// Memory figures from `/proc/<pid>/status`, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcStatus {
    pub vm_data: u64,
    pub vm_stk: u64,
}

/// Parse the contents of a `/proc/<pid>/status` file
///
/// Sizes are reported in kB; missing fields stay zero.
pub fn parse_proc_status(content: &str) -> ProcStatus {
    let fields: HashMap<&str, u64> = content
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim(), value))
        })
        .collect();

    let kib = |key: &str| fields.get(key).copied().unwrap_or(0) * 1024;

    ProcStatus {
        vm_data: kib("VmData"),
        vm_stk: kib("VmStk"),
    }
}

/// Read this process's status; zeros on platforms without procfs
pub async fn read_proc_status() -> Result<ProcStatus> {
    if !cfg!(target_os = "linux") {
        return Ok(ProcStatus::default());
    }

    let content = tokio::fs::read_to_string("/proc/self/status")
        .await
        .context("Failed to read /proc/self/status")?;
    Ok(parse_proc_status(&content))
}
