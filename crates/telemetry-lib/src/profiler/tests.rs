//! Tests for the function profiler
//!
//! Only one execution-time recorder can run per process, so every test
//! holds `recorder_lock()` while it traces.

use super::*;
use std::time::Duration;
use tempfile::TempDir;

fn profiler(dir: &TempDir) -> FunctionProfiler {
    FunctionProfiler::new(dir.path().join("profiles"), StructuredLogger::new("test-service"))
}

fn busy_for(duration: Duration) -> u64 {
    let started = Instant::now();
    let mut acc = 0u64;
    while started.elapsed() < duration {
        acc = std::hint::black_box(acc.wrapping_mul(31).wrapping_add(7));
    }
    acc
}

#[test]
fn test_trace_returns_result_and_records_profile() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let profiler = profiler(&dir);

    let value = profiler.trace("sum", || (1..=10).sum::<u32>());

    assert_eq!(value, 55);
    let profile = profiler.profile("sum").unwrap();
    assert_eq!(profile.name, "sum");
    assert_eq!(profile.task_delta, 0);
    assert!(profile.last_ran_at <= Utc::now());
    assert_eq!(profiler.len(), 1);
}

#[test]
fn test_heap_artifact_written() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let profiler = profiler(&dir);

    profiler.trace("alloc", || std::hint::black_box(vec![1u8; 1024]).len());

    let path = profiler.profile("alloc").unwrap().heap_profile_path.unwrap();
    assert_eq!(path, dir.path().join("profiles").join("alloc_mem.json"));
    let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(value["function"], "alloc");
}

#[test]
fn test_allocation_delta_counts_retained_memory() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let profiler = profiler(&dir);

    let retained = profiler.trace("retain", || std::hint::black_box(vec![7u8; 8 * 1024 * 1024]));

    let profile = profiler.profile("retain").unwrap();
    assert!(profile.allocation_delta >= 1024 * 1024, "delta {}", profile.allocation_delta);
    drop(retained);
}

#[test]
fn test_freeing_memory_saturates_at_zero() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let profiler = profiler(&dir);
    let buffer = std::hint::black_box(vec![0u8; 64 * 1024 * 1024]);

    profiler.trace("release", move || drop(buffer));

    assert_eq!(profiler.profile("release").unwrap().allocation_delta, 0);
}

#[tokio::test]
async fn test_task_delta_counts_spawned_tasks() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let profiler = profiler(&dir);

    let handles = profiler.trace("spawner", || {
        (0..3)
            .map(|_| tokio::spawn(tokio::time::sleep(Duration::from_secs(60))))
            .collect::<Vec<_>>()
    });

    assert!(profiler.profile("spawner").unwrap().task_delta >= 3);
    for handle in handles {
        handle.abort();
    }
}

#[test]
fn test_execution_time_measured() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let profiler = profiler(&dir);

    profiler.trace("sleepy", || std::thread::sleep(Duration::from_millis(50)));

    assert!(profiler.profile("sleepy").unwrap().execution_time >= Duration::from_millis(50));
}

#[test]
fn test_unwritable_dir_still_measures() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let blocked = dir.path().join("profiles");
    std::fs::write(&blocked, b"not a directory").unwrap();
    let profiler = FunctionProfiler::new(&blocked, StructuredLogger::new("test-service"));

    let value = profiler.trace("blocked", || {
        std::thread::sleep(Duration::from_millis(10));
        42
    });

    assert_eq!(value, 42);
    let profile = profiler.profile("blocked").unwrap();
    assert!(profile.cpu_profile_path.is_none());
    assert!(profile.heap_profile_path.is_none());
    assert!(profile.execution_time >= Duration::from_millis(10));
}

#[test]
fn test_rerun_overwrites_entry() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let profiler = profiler(&dir);

    profiler.trace("job", || std::thread::sleep(Duration::from_millis(30)));
    let first = profiler.profile("job").unwrap();
    profiler.trace("job", || ());
    let second = profiler.profile("job").unwrap();

    assert_eq!(profiler.len(), 1);
    assert!(second.last_ran_at >= first.last_ran_at);
    assert!(second.execution_time < first.execution_time);
    assert_eq!(first.heap_profile_path, second.heap_profile_path);
}

#[test]
fn test_profiles_sorted_by_name() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let profiler = profiler(&dir);

    for name in ["gamma", "alpha", "beta"] {
        profiler.trace(name, || ());
    }

    let names: Vec<String> = profiler.profiles().into_iter().map(|p| p.name).collect();
    assert_eq!(names, ["alpha", "beta", "gamma"]);
    assert!(profiler.profile("delta").is_none());
}

#[test]
fn test_trace_fn_names_after_type() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let profiler = profiler(&dir);

    profiler.trace_fn(|| ());

    let profiles = profiler.profiles();
    assert_eq!(profiles.len(), 1);
    let name = &profiles[0].name;
    assert!(!name.contains("::"));
    assert!(name.contains("profiler-tests"), "unexpected name {}", name);
}

#[cfg(unix)]
#[test]
fn test_cpu_artifact_written_for_busy_function() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let profiler = profiler(&dir);

    profiler.trace("busy", || busy_for(Duration::from_millis(300)));

    let path = profiler.profile("busy").unwrap().cpu_profile_path.unwrap();
    assert_eq!(path, dir.path().join("profiles").join("busy_cpu.svg"));
    let svg = std::fs::read_to_string(&path).unwrap();
    assert!(svg.contains("<svg"));
}

#[cfg(unix)]
#[test]
fn test_nested_trace_reports_missing_cpu_artifact() {
    let _serial = recorder_lock();
    let dir = TempDir::new().unwrap();
    let profiler = profiler(&dir);

    profiler.trace("outer", || {
        profiler.trace("inner", || busy_for(Duration::from_millis(20)))
    });

    let inner = profiler.profile("inner").unwrap();
    assert!(inner.cpu_profile_path.is_none());
    assert!(inner.heap_profile_path.is_some());
    assert!(!dir.path().join("profiles").join("inner_cpu.svg").exists());
}
