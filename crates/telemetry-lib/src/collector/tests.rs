//! Tests for snapshot collection
//!
//! These tests use a mock probe to check the fan-out/fan-in behaviour
//! without depending on host load, plus a smoke test of the real probe.

use super::testing::MockProbe;
use super::*;
use std::time::Duration;

mod snapshot_collector_tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_assembles_snapshot() {
        let probe = Arc::new(MockProbe::default());
        let requests = RequestCounter::new();
        requests.record(Duration::from_millis(20));

        let collector = SnapshotCollector::new(probe.clone(), requests);
        let snapshot = collector.collect().await.unwrap();

        assert_eq!(snapshot.tasks, 50);
        assert_eq!(snapshot.cpu, probe.cpu);
        assert_eq!(snapshot.memory, probe.memory);
        assert_eq!(snapshot.allocator, probe.allocator);
        assert_eq!(snapshot.network, probe.network);
        assert_eq!(snapshot.requests.request_count, 1);
        assert_eq!(snapshot.overall_load(), 40.0);
        assert!(snapshot.timestamp > 0);
    }

    #[tokio::test]
    async fn test_sub_collectors_run_concurrently() {
        let probe = Arc::new(MockProbe::default().with_delay(Duration::from_millis(300)));
        let collector = SnapshotCollector::new(probe, RequestCounter::new());

        let start = std::time::Instant::now();
        collector.collect().await.unwrap();

        // Five sequential calls would take 1.5s
        assert!(start.elapsed() < Duration::from_millis(1_200));
    }

    #[tokio::test]
    async fn test_failure_fails_cycle_without_cancelling_siblings() {
        let probe = Arc::new(
            MockProbe::default()
                .with_delay(Duration::from_millis(50))
                .failing("network"),
        );
        let collector = SnapshotCollector::new(probe.clone(), RequestCounter::new());

        let err = collector.collect().await.unwrap_err();

        assert!(format!("{:#}", err).contains("network sub-collector failed"));
        assert_eq!(probe.completed(), 5);
    }

    #[tokio::test]
    async fn test_next_cycle_recovers() {
        let probe = Arc::new(MockProbe::default().failing("cpu"));
        let collector = SnapshotCollector::new(probe.clone(), RequestCounter::new());

        assert!(collector.collect().await.is_err());

        probe.set_failing(None);
        assert!(collector.collect().await.is_ok());
    }
}

mod proc_status_tests {
    use super::*;

    const STATUS: &str = "Name:\tagent
Umask:\t0022
State:\tS (sleeping)
VmPeak:\t  123456 kB
VmRSS:\t   20480 kB
VmData:\t   65536 kB
VmStk:\t     132 kB
Threads:\t9
";

    #[test]
    fn test_parse_proc_status() {
        let status = parse_proc_status(STATUS);

        assert_eq!(status.vm_data, 65_536 * 1024);
        assert_eq!(status.vm_stk, 132 * 1024);
    }

    #[test]
    fn test_parse_proc_status_missing_fields() {
        let status = parse_proc_status("Name:\tagent\nVmStk:\tgarbage kB\n");
        assert_eq!(status, ProcStatus::default());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_read_own_status() {
        let status = read_proc_status().await.unwrap();
        assert!(status.vm_data > 0);
        assert!(status.vm_stk > 0);
    }
}

mod allocator_tests {
    use super::*;

    #[test]
    fn test_counters_track_allocations() {
        let before = allocator_counters();
        let data = std::hint::black_box(vec![0u8; 64 * 1024]);
        let after = allocator_counters();

        assert!(after.tracking);
        assert!(after.total_allocated >= before.total_allocated + data.len() as u64);
        assert!(after.mallocs > before.mallocs);
        drop(data);
    }

    #[test]
    fn test_live_objects_saturate() {
        let counters = AllocatorCounters {
            mallocs: 3,
            frees: 5,
            ..Default::default()
        };
        assert_eq!(counters.live_objects(), 0);
    }
}

mod sysinfo_probe_tests {
    use super::*;

    #[tokio::test]
    async fn test_real_probe_snapshot() {
        let probe = Arc::new(SysinfoProbe::new(Duration::from_millis(250)).unwrap());
        let collector = SnapshotCollector::new(probe, RequestCounter::new());

        let snapshot = collector.collect().await.unwrap();

        assert!(snapshot.cpu.total_logical_cores >= 1.0);
        assert!(snapshot.cpu.total_cores >= 1.0);
        assert!((0.0..=100.0).contains(&snapshot.cpu.service_cpu_load));
        assert!(snapshot.memory.total_system_memory > 0.0);
        assert!(snapshot.memory.memory_used_by_service > 0.0);
        assert!(snapshot.memory.service_memory_load <= 100.0);
        assert!(snapshot.tasks >= 1);
    }

    #[tokio::test]
    async fn test_overlapping_cpu_samples_take_full_window() {
        let window = Duration::from_millis(250);
        let probe = SysinfoProbe::new(window).unwrap();

        let timed = || async {
            let started = std::time::Instant::now();
            let sample = probe.cpu().await;
            (started, std::time::Instant::now(), sample)
        };

        let overall = std::time::Instant::now();
        let ((first_start, first_end, first), (second_start, second_end, second)) =
            tokio::join!(timed(), timed());

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(first_end - first_start >= window);
        assert!(second_end - second_start >= window);
        // One window never overlaps another
        assert!(overall.elapsed() >= window * 2);
        let (earlier_end, later_end) = if first_end <= second_end {
            (first_end, second_end)
        } else {
            (second_end, first_end)
        };
        assert!(later_end - earlier_end >= window);
    }
}
