//! Host counter probes.
//!
//! The sampler only sees the [`HostProbe`] trait. [`SystemProbe`] reads the
//! live host: CPU times and disk counts from `/proc`, network totals through
//! `sysinfo`.

use sysinfo::{Networks, System};

use crate::errors::ProbeError;

/// Kernel clock ticks per second for `/proc/stat` (`USER_HZ`).
const USER_HZ: f64 = 100.0;

/// Cumulative CPU time across all cores, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTimes {
    pub user: f64,
    pub system: f64,
}

/// Cumulative bytes across all interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetTotals {
    pub recv: u64,
    pub sent: u64,
}

/// Cumulative completed I/O operations across all block devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskCounts {
    pub reads: u64,
    pub writes: u64,
}

/// Source of cumulative host counters.
pub trait HostProbe: Send + 'static {
    fn cpu_times(&mut self) -> Result<CpuTimes, ProbeError>;

    /// Logical cores; never zero.
    fn cpu_count(&mut self) -> usize;

    fn network_totals(&mut self) -> Result<NetTotals, ProbeError>;

    fn disk_counts(&mut self) -> Result<DiskCounts, ProbeError>;
}

/// Probe for the machine the process runs on.
pub struct SystemProbe {
    networks: Networks,
    cores: usize,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        Self {
            networks: Networks::new_with_refreshed_list(),
            cores: sys.cpus().len().max(1),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProbe")
            .field("cores", &self.cores)
            .finish_non_exhaustive()
    }
}

impl HostProbe for SystemProbe {
    #[cfg(target_os = "linux")]
    fn cpu_times(&mut self) -> Result<CpuTimes, ProbeError> {
        let text = read_proc("/proc/stat")?;
        parse_proc_stat(&text)
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu_times(&mut self) -> Result<CpuTimes, ProbeError> {
        Err(ProbeError::Unsupported("/proc/stat"))
    }

    fn cpu_count(&mut self) -> usize {
        self.cores
    }

    fn network_totals(&mut self) -> Result<NetTotals, ProbeError> {
        self.networks.refresh();
        let mut totals = NetTotals::default();
        for (_name, data) in self.networks.iter() {
            totals.recv = totals.recv.wrapping_add(data.total_received());
            totals.sent = totals.sent.wrapping_add(data.total_transmitted());
        }
        Ok(totals)
    }

    #[cfg(target_os = "linux")]
    fn disk_counts(&mut self) -> Result<DiskCounts, ProbeError> {
        let text = read_proc("/proc/diskstats")?;
        parse_diskstats(&text)
    }

    #[cfg(not(target_os = "linux"))]
    fn disk_counts(&mut self) -> Result<DiskCounts, ProbeError> {
        Err(ProbeError::Unsupported("/proc/diskstats"))
    }
}

#[cfg(target_os = "linux")]
fn read_proc(path: &'static str) -> Result<String, ProbeError> {
    std::fs::read_to_string(path).map_err(|error| ProbeError::Io {
        source_name: path,
        error,
    })
}

/// Parse the aggregate `cpu` line of `/proc/stat`.
pub fn parse_proc_stat(text: &str) -> Result<CpuTimes, ProbeError> {
    let malformed = |detail: &str| ProbeError::Malformed {
        source_name: "/proc/stat",
        detail: detail.to_string(),
    };
    let line = text
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| malformed("no aggregate cpu line"))?;

    let ticks: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| malformed(line))?;
    // user nice system idle ...
    if ticks.len() < 3 {
        return Err(malformed(line));
    }
    Ok(CpuTimes {
        user: ticks[0] as f64 / USER_HZ,
        system: ticks[2] as f64 / USER_HZ,
    })
}

/// Sum completed reads and writes over every line of `/proc/diskstats`.
pub fn parse_diskstats(text: &str) -> Result<DiskCounts, ProbeError> {
    let mut counts = DiskCounts::default();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // major minor name reads merged sectors ms writes ...
        let (Some(reads), Some(writes)) = (fields.get(3).copied(), fields.get(7).copied()) else {
            return Err(ProbeError::Malformed {
                source_name: "/proc/diskstats",
                detail: line.to_string(),
            });
        };
        let parse = |v: &str| {
            v.parse::<u64>().map_err(|_| ProbeError::Malformed {
                source_name: "/proc/diskstats",
                detail: line.to_string(),
            })
        };
        counts.reads = counts.reads.wrapping_add(parse(reads)?);
        counts.writes = counts.writes.wrapping_add(parse(writes)?);
    }
    Ok(counts)
}
