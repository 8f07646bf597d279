//! Host metrics collection from procfs
//!
//! Reads host-wide counters from the proc filesystem:
//! - stat for CPU busy time (sampled twice across a short window)
//! - meminfo for memory pressure
//! - loadavg, net/dev and diskstats for load, network and block I/O
//!
//! Disk usage comes from `statvfs` on the configured mount point.

use super::MetricsCollector;
use crate::error::{DetectorError, Result};
use crate::models::MetricsSample;
use async_trait::async_trait;
use nix::sys::statvfs::statvfs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SECTOR_SIZE: u64 = 512;

/// Default window between the two `/proc/stat` reads
pub const DEFAULT_CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(1000);

/// Aggregate CPU jiffies from the `cpu` line of `/proc/stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Percentage of time busy between two snapshots
    pub fn percent_since(&self, earlier: &CpuTimes) -> f64 {
        let total = self.total.saturating_sub(earlier.total);
        if total == 0 {
            return 0.0;
        }
        let busy = self.busy.saturating_sub(earlier.busy);
        (busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Cumulative byte counters summed across devices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCounters {
    pub read_bytes: u64,
    pub written_bytes: u64,
}

/// Collector for host-wide metrics read from procfs
pub struct ProcfsCollector {
    proc_root: PathBuf,
    disk_mount: PathBuf,
    cpu_sample_window: Duration,
}

impl Default for ProcfsCollector {
    fn default() -> Self {
        Self::new("/proc", "/")
    }
}

impl ProcfsCollector {
    pub fn new(proc_root: impl Into<PathBuf>, disk_mount: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            disk_mount: disk_mount.into(),
            cpu_sample_window: DEFAULT_CPU_SAMPLE_WINDOW,
        }
    }

    pub fn with_cpu_sample_window(mut self, window: Duration) -> Self {
        self.cpu_sample_window = window;
        self
    }

    /// Check that the proc root looks like a proc filesystem
    pub async fn is_available(&self) -> bool {
        fs::metadata(self.proc_root.join("stat")).await.is_ok()
    }

    /// Parse the aggregate `cpu` line of `/proc/stat`.
    /// Idle time includes iowait; guest time is already counted in user.
    pub fn parse_cpu_stat(content: &str) -> Result<CpuTimes> {
        let line = content
            .lines()
            .find(|l| l.split_whitespace().next() == Some("cpu"))
            .ok_or_else(|| DetectorError::Collection("no aggregate cpu line in stat".into()))?;

        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|f| f.parse::<u64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| DetectorError::Collection(format!("bad cpu counter in stat: {}", e)))?;

        if fields.len() < 4 {
            return Err(DetectorError::Collection(format!(
                "cpu line has {} fields, expected at least 4",
                fields.len()
            )));
        }

        let total: u64 = fields.iter().sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Ok(CpuTimes {
            busy: total.saturating_sub(idle),
            total,
        })
    }

    /// Memory in use as a percentage, from MemTotal and MemAvailable
    pub fn parse_meminfo(content: &str) -> Result<f64> {
        let mut total = None;
        let mut available = None;

        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                match parts[0] {
                    "MemTotal:" => total = parts[1].parse::<u64>().ok(),
                    "MemAvailable:" => available = parts[1].parse::<u64>().ok(),
                    _ => {}
                }
            }
        }

        match (total, available) {
            (Some(total), Some(available)) if total > 0 => {
                let used = total.saturating_sub(available);
                Ok(used as f64 / total as f64 * 100.0)
            }
            (Some(0), _) => Err(DetectorError::Collection("MemTotal is zero".into())),
            _ => Err(DetectorError::Collection(
                "meminfo is missing MemTotal or MemAvailable".into(),
            )),
        }
    }

    /// One-minute load average
    pub fn parse_loadavg(content: &str) -> Result<f64> {
        content
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| DetectorError::Collection("unparsable loadavg".into()))
    }

    /// Sum receive and transmit bytes over every interface
    pub fn parse_net_dev(content: &str) -> Result<IoCounters> {
        let mut counters = IoCounters::default();

        // Two header lines precede the interface rows
        for line in content.lines().skip(2) {
            let Some((_, stats)) = line.split_once(':') else {
                continue;
            };
            let fields: Vec<&str> = stats.split_whitespace().collect();
            if fields.len() < 9 {
                return Err(DetectorError::Collection(format!(
                    "short net/dev row: {}",
                    line.trim()
                )));
            }
            let rx = parse_counter(fields[0], "net/dev rx_bytes")?;
            let tx = parse_counter(fields[8], "net/dev tx_bytes")?;
            counters.read_bytes += rx;
            counters.written_bytes += tx;
        }

        Ok(counters)
    }

    /// Sum sectors read and written over whole disks
    pub fn parse_diskstats(content: &str) -> Result<IoCounters> {
        let mut counters = IoCounters::default();

        for line in content.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                continue;
            }
            if !is_whole_disk(fields[2]) {
                continue;
            }
            let sectors_read = parse_counter(fields[5], "diskstats sectors read")?;
            let sectors_written = parse_counter(fields[9], "diskstats sectors written")?;
            counters.read_bytes += sectors_read * SECTOR_SIZE;
            counters.written_bytes += sectors_written * SECTOR_SIZE;
        }

        Ok(counters)
    }

    /// Count numeric (pid) entries under the proc root
    pub async fn count_processes(&self) -> Result<usize> {
        let mut entries = fs::read_dir(&self.proc_root).await.map_err(|e| {
            DetectorError::Collection(format!("failed to list {}: {}", self.proc_root.display(), e))
        })?;

        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DetectorError::Collection(format!("failed to list proc entries: {}", e)))?
        {
            let name = entry.file_name();
            if name.to_string_lossy().parse::<u32>().is_ok() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Used space of the configured mount as a percentage of user-visible space
    pub fn disk_usage_percent(&self) -> Result<f64> {
        statvfs_percent(&self.disk_mount)
    }

    async fn read_proc(&self, relative: &str) -> Result<String> {
        let path = self.proc_root.join(relative);
        fs::read_to_string(&path)
            .await
            .map_err(|e| DetectorError::Collection(format!("failed to read {}: {}", path.display(), e)))
    }

    async fn sample_cpu(&self) -> Result<f64> {
        let before = Self::parse_cpu_stat(&self.read_proc("stat").await?)?;
        tokio::time::sleep(self.cpu_sample_window).await;
        let after = Self::parse_cpu_stat(&self.read_proc("stat").await?)?;
        Ok(after.percent_since(&before))
    }
}

#[async_trait]
impl MetricsCollector for ProcfsCollector {
    async fn collect(&self) -> Result<MetricsSample> {
        let cpu_percent = self.sample_cpu().await?;
        let timestamp = chrono::Utc::now();

        let memory_percent = Self::parse_meminfo(&self.read_proc("meminfo").await?)?;
        let disk_percent = self.disk_usage_percent()?;
        let process_count = self.count_processes().await? as f64;
        let load_avg = Self::parse_loadavg(&self.read_proc("loadavg").await?)?;
        let net = Self::parse_net_dev(&self.read_proc("net/dev").await?)?;
        let io = Self::parse_diskstats(&self.read_proc("diskstats").await?)?;

        Ok(MetricsSample {
            timestamp,
            cpu_percent,
            memory_percent,
            disk_percent,
            process_count,
            load_avg,
            net_sent_mb: net.written_bytes as f64 / BYTES_PER_MB,
            net_recv_mb: net.read_bytes as f64 / BYTES_PER_MB,
            io_read_mb: io.read_bytes as f64 / BYTES_PER_MB,
            io_write_mb: io.written_bytes as f64 / BYTES_PER_MB,
        })
    }

    fn name(&self) -> &str {
        "procfs"
    }
}

fn parse_counter(field: &str, what: &str) -> Result<u64> {
    field
        .parse::<u64>()
        .map_err(|_| DetectorError::Collection(format!("bad {} value '{}'", what, field)))
}

/// Whole block devices only: partitions, loop and ram devices are skipped
pub fn is_whole_disk(name: &str) -> bool {
    if name.starts_with("loop") || name.starts_with("ram") {
        return false;
    }
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        // nvme0n1p2, mmcblk0p1
        return match name.rsplit_once('p') {
            Some((head, tail)) => {
                !(head.ends_with(|c: char| c.is_ascii_digit())
                    && !tail.is_empty()
                    && tail.chars().all(|c| c.is_ascii_digit()))
            }
            None => true,
        };
    }
    // sda1, vdb2, xvda1
    !name.ends_with(|c: char| c.is_ascii_digit())
}

fn statvfs_percent(mount: &Path) -> Result<f64> {
    let stat = statvfs(mount).map_err(|e| {
        DetectorError::Collection(format!("statvfs failed on {}: {}", mount.display(), e))
    })?;

    let block_size = stat.fragment_size() as u64;
    let total = stat.blocks() as u64 * block_size;
    let free = stat.blocks_free() as u64 * block_size;
    let avail = stat.blocks_available() as u64 * block_size;
    let used = total.saturating_sub(free);
    let visible = used + avail;

    if visible == 0 {
        return Ok(0.0);
    }
    Ok(used as f64 / visible as f64 * 100.0)
}
