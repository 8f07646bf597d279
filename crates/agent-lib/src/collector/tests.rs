//! Integration tests for metrics collection
//!
//! These tests use a mock proc filesystem to test metric parsing
//! and collection without reading the real host counters.

#[cfg(test)]
mod mock_procfs_tests {
    use crate::collector::{MetricsCollector, ProcfsCollector};
    use crate::error::DetectorError;
    use crate::models::extract_features;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::fs;

    /// Helper to create a mock proc filesystem
    async fn create_mock_procfs(temp_dir: &TempDir) -> PathBuf {
        let proc_root = temp_dir.path().join("proc");
        fs::create_dir_all(proc_root.join("net")).await.unwrap();

        fs::write(
            proc_root.join("stat"),
            "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 100 0 50 800 50 0 0 0 0 0\nintr 12345\n",
        )
        .await
        .unwrap();

        let meminfo = r#"MemTotal:        8000000 kB
MemFree:         1000000 kB
MemAvailable:    2000000 kB
Buffers:          100000 kB
"#;
        fs::write(proc_root.join("meminfo"), meminfo).await.unwrap();

        fs::write(proc_root.join("loadavg"), "0.75 0.60 0.50 3/412 9876\n")
            .await
            .unwrap();

        let net_dev = r#"Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1048576 100 0 0 0 0 0 0 1048576 100 0 0 0 0 0 0
  eth0: 2097152 200 0 0 0 0 0 0 3145728 300 0 0 0 0 0 0
"#;
        fs::write(proc_root.join("net/dev"), net_dev).await.unwrap();

        // 2048 sectors = 1 MiB
        let diskstats = r#"   8       0 sda 100 0 4096 0 50 0 2048 0 0 0 0
   8       1 sda1 100 0 4096 0 50 0 2048 0 0 0 0
   7       0 loop0 5 0 10 0 0 0 0 0 0 0 0
"#;
        fs::write(proc_root.join("diskstats"), diskstats).await.unwrap();

        for pid in ["1", "42", "1337"] {
            fs::create_dir_all(proc_root.join(pid)).await.unwrap();
        }
        fs::create_dir_all(proc_root.join("sys")).await.unwrap();

        proc_root
    }

    fn collector_for(temp_dir: &TempDir, proc_root: PathBuf) -> ProcfsCollector {
        ProcfsCollector::new(proc_root, temp_dir.path()).with_cpu_sample_window(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_procfs_collect_metrics() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_procfs(&temp_dir).await;
        let collector = collector_for(&temp_dir, proc_root);

        assert!(collector.is_available().await);
        let sample = collector.collect().await.unwrap();

        // Unchanged stat between reads means no busy delta
        assert_eq!(sample.cpu_percent, 0.0);
        assert!((sample.memory_percent - 75.0).abs() < 1e-9);
        assert!(sample.disk_percent >= 0.0 && sample.disk_percent <= 100.0);
        assert_eq!(sample.process_count, 3.0);
        assert_eq!(sample.load_avg, 0.75);
        assert!((sample.net_recv_mb - 3.0).abs() < 1e-9);
        assert!((sample.net_sent_mb - 4.0).abs() < 1e-9);
        assert!((sample.io_read_mb - 2.0).abs() < 1e-9);
        assert!((sample.io_write_mb - 1.0).abs() < 1e-9);

        // Collected samples always pass schema validation
        assert!(extract_features(&sample).is_ok());
    }

    #[tokio::test]
    async fn test_missing_counter_fails_whole_sample() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_procfs(&temp_dir).await;
        fs::remove_file(proc_root.join("diskstats")).await.unwrap();

        let collector = collector_for(&temp_dir, proc_root);
        let err = collector.collect().await.unwrap_err();
        assert!(matches!(err, DetectorError::Collection(_)));
        assert!(err.to_string().contains("diskstats"));
    }

    #[tokio::test]
    async fn test_corrupt_meminfo_fails_sample() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_procfs(&temp_dir).await;
        fs::write(proc_root.join("meminfo"), "garbage\n").await.unwrap();

        let collector = collector_for(&temp_dir, proc_root);
        assert!(matches!(
            collector.collect().await,
            Err(DetectorError::Collection(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_proc_root() {
        let temp_dir = TempDir::new().unwrap();
        let collector = collector_for(&temp_dir, temp_dir.path().join("nonexistent"));

        assert!(!collector.is_available().await);
        assert!(collector.collect().await.is_err());
    }

    #[tokio::test]
    async fn test_count_processes_ignores_non_pid_entries() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_procfs(&temp_dir).await;
        fs::create_dir_all(proc_root.join("self")).await.unwrap();
        fs::write(proc_root.join("uptime"), "1.0 2.0\n").await.unwrap();

        let collector = collector_for(&temp_dir, proc_root);
        assert_eq!(collector.count_processes().await.unwrap(), 3);
    }

    #[test]
    fn test_disk_usage_of_real_mount() {
        let temp_dir = TempDir::new().unwrap();
        let collector = ProcfsCollector::new("/proc", temp_dir.path());
        let pct = collector.disk_usage_percent().unwrap();
        assert!((0.0..=100.0).contains(&pct));
    }

    #[test]
    fn test_disk_usage_of_missing_mount() {
        let collector = ProcfsCollector::new("/proc", "/definitely/not/a/mount/point");
        assert!(matches!(
            collector.disk_usage_percent(),
            Err(DetectorError::Collection(_))
        ));
    }
}
