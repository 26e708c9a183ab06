//! Host analytics sampler.
//!
//! Six bounded series of `(timestamp, value)` records: CPU user and total
//! percent, network receive and send deltas, disk read and write deltas.
//! A single [`Sampler`] task owns the writes; readers copy series out under
//! a shared lock.
//!
//! Each series is seeded with [`SERIES_CAPACITY`] zero records stamped one
//! second apart just before start, so charts have a full window from the
//! first read.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::ProbeError;
use crate::metrics::{
    CPU_TOTAL_PERCENT, CPU_USER_PERCENT, DISK_READ_OPS, DISK_WRITE_OPS, NET_RECV_BYTES,
    NET_SENT_BYTES, PROBE_FAILURES_TOTAL,
};
use crate::probe::{CpuTimes, DiskCounts, HostProbe, NetTotals};

/// Records kept per series.
pub const SERIES_CAPACITY: usize = 100;

/// Nominal tick, also the CPU measurement window.
pub const TICK: Duration = Duration::from_secs(1);

/// One sample. `timestamp` is Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Record {
    pub timestamp: i64,
    pub value: f64,
}

/// The six sampled series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Series {
    CpuUser,
    CpuTotal,
    NetRecv,
    NetSent,
    DiskRead,
    DiskWrite,
}

impl Series {
    pub const ALL: [Series; 6] = [
        Series::CpuUser,
        Series::CpuTotal,
        Series::NetRecv,
        Series::NetSent,
        Series::DiskRead,
        Series::DiskWrite,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn gauge_name(self) -> &'static str {
        match self {
            Series::CpuUser => CPU_USER_PERCENT,
            Series::CpuTotal => CPU_TOTAL_PERCENT,
            Series::NetRecv => NET_RECV_BYTES,
            Series::NetSent => NET_SENT_BYTES,
            Series::DiskRead => DISK_READ_OPS,
            Series::DiskWrite => DISK_WRITE_OPS,
        }
    }
}

/// Copy of every series at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    pub cpu_user: Vec<Record>,
    pub cpu_total: Vec<Record>,
    pub net_recv: Vec<Record>,
    pub net_sent: Vec<Record>,
    pub disk_read: Vec<Record>,
    pub disk_write: Vec<Record>,
}

/// Ring-buffered series shared between the sampler and readers.
#[derive(Debug)]
pub struct Analytics {
    series: RwLock<[VecDeque<Record>; 6]>,
}

impl Analytics {
    /// Series seeded with zero records at `now - 100 .. now - 1`.
    pub fn new() -> Self {
        Self::seeded_at(chrono::Utc::now().timestamp())
    }

    /// Series seeded with zero records ending one second before `now`.
    pub fn seeded_at(now: i64) -> Self {
        let seed: VecDeque<Record> = (1..=SERIES_CAPACITY as i64)
            .rev()
            .map(|i| Record {
                timestamp: now - i,
                value: 0.0,
            })
            .collect();
        Self {
            series: RwLock::new(std::array::from_fn(|_| seed.clone())),
        }
    }

    /// Copy of one series, oldest first.
    pub fn series(&self, series: Series) -> Vec<Record> {
        let guard = self.series.read().expect("analytics lock poisoned");
        guard[series.index()].iter().copied().collect()
    }

    pub fn cpu_user(&self) -> Vec<Record> {
        self.series(Series::CpuUser)
    }

    pub fn cpu_total(&self) -> Vec<Record> {
        self.series(Series::CpuTotal)
    }

    pub fn net_recv(&self) -> Vec<Record> {
        self.series(Series::NetRecv)
    }

    pub fn net_sent(&self) -> Vec<Record> {
        self.series(Series::NetSent)
    }

    pub fn disk_read(&self) -> Vec<Record> {
        self.series(Series::DiskRead)
    }

    pub fn disk_write(&self) -> Vec<Record> {
        self.series(Series::DiskWrite)
    }

    /// All six series, copied under one lock.
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let guard = self.series.read().expect("analytics lock poisoned");
        let copy = |s: Series| guard[s.index()].iter().copied().collect::<Vec<_>>();
        AnalyticsSnapshot {
            cpu_user: copy(Series::CpuUser),
            cpu_total: copy(Series::CpuTotal),
            net_recv: copy(Series::NetRecv),
            net_sent: copy(Series::NetSent),
            disk_read: copy(Series::DiskRead),
            disk_write: copy(Series::DiskWrite),
        }
    }

    /// Append one tick's values, all stamped with the same timestamp.
    ///
    /// The stamp is `now`, or one second past the newest record when the
    /// wall clock has not moved past it, so every series stays strictly
    /// increasing.
    fn append_tick(&self, now: i64, values: &[(Series, f64)]) -> i64 {
        let mut guard = self.series.write().expect("analytics lock poisoned");
        let newest = guard
            .iter()
            .filter_map(|ring| ring.back().map(|r| r.timestamp))
            .max()
            .unwrap_or(i64::MIN);
        let timestamp = if now > newest { now } else { newest + 1 };
        for &(series, value) in values {
            let ring = &mut guard[series.index()];
            ring.push_back(Record { timestamp, value });
            while ring.len() > SERIES_CAPACITY {
                ring.pop_front();
            }
        }
        timestamp
    }
}

impl Default for Analytics {
    fn default() -> Self {
        Self::new()
    }
}

// -- Sampler ------------------------------------------------------------------

/// Reads host counters every tick and appends deltas to [`Analytics`].
pub struct Sampler<P: HostProbe> {
    probe: P,
    analytics: Arc<Analytics>,
    window: Duration,
    last_net: Option<NetTotals>,
    last_disk: Option<DiskCounts>,
}

impl<P: HostProbe> Sampler<P> {
    /// Capture the network and disk baselines.
    ///
    /// A baseline that cannot be read is taken from the first successful
    /// read instead; no delta is recorded for that read.
    pub fn new(mut probe: P, analytics: Arc<Analytics>) -> Self {
        let last_net = baseline(probe.network_totals(), "network");
        let last_disk = baseline(probe.disk_counts(), "disk");
        Self {
            probe,
            analytics,
            window: TICK,
            last_net,
            last_disk,
        }
    }

    /// Use a different CPU measurement window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn analytics(&self) -> Arc<Analytics> {
        Arc::clone(&self.analytics)
    }

    /// Run one tick: measure CPU over the window, then read network and disk
    /// counters. Returns the timestamp the values were recorded at.
    pub async fn tick(&mut self) -> i64 {
        let mut values = Vec::with_capacity(Series::ALL.len());

        match self.sample_cpu().await {
            Ok((user, total)) => {
                values.push((Series::CpuUser, user));
                values.push((Series::CpuTotal, total));
            }
            Err(e) => probe_failed("cpu", &e),
        }

        match self.probe.network_totals() {
            Ok(current) => {
                if let Some(last) = self.last_net {
                    values.push((Series::NetRecv, current.recv.wrapping_sub(last.recv) as f64));
                    values.push((Series::NetSent, current.sent.wrapping_sub(last.sent) as f64));
                }
                self.last_net = Some(current);
            }
            Err(e) => probe_failed("network", &e),
        }

        match self.probe.disk_counts() {
            Ok(current) => {
                if let Some(last) = self.last_disk {
                    values.push((Series::DiskRead, current.reads.wrapping_sub(last.reads) as f64));
                    values.push((Series::DiskWrite, current.writes.wrapping_sub(last.writes) as f64));
                }
                self.last_disk = Some(current);
            }
            Err(e) => probe_failed("disk", &e),
        }

        for &(series, value) in &values {
            gauge!(series.gauge_name()).set(value);
        }
        let timestamp = self
            .analytics
            .append_tick(chrono::Utc::now().timestamp(), &values);
        debug!("analytics tick at {} with {} values", timestamp, values.len());
        timestamp
    }

    /// Tick forever.
    pub async fn run(mut self) {
        loop {
            self.tick().await;
        }
    }

    /// `(user%, total%)` over one window.
    async fn sample_cpu(&mut self) -> Result<(f64, f64), ProbeError> {
        // Always wait out the window so a failing probe cannot spin the loop.
        let before = self.probe.cpu_times();
        tokio::time::sleep(self.window).await;
        let after = self.probe.cpu_times();
        let (before, after) = (before?, after?);
        let cores = self.probe.cpu_count().max(1);
        Ok(cpu_percent(before, after, cores, self.window))
    }
}

/// Start a sampler on its own task.
pub fn spawn<P: HostProbe>(probe: P) -> (Arc<Analytics>, JoinHandle<()>) {
    let analytics = Arc::new(Analytics::new());
    let sampler = Sampler::new(probe, Arc::clone(&analytics));
    let handle = tokio::spawn(sampler.run());
    (analytics, handle)
}

/// User and user+system CPU time over `window`, as percent of all cores.
pub fn cpu_percent(before: CpuTimes, after: CpuTimes, cores: usize, window: Duration) -> (f64, f64) {
    let capacity = cores as f64 * window.as_secs_f64();
    if capacity <= 0.0 {
        return (0.0, 0.0);
    }
    let user = (after.user - before.user).max(0.0);
    let system = (after.system - before.system).max(0.0);
    (user / capacity * 100.0, (user + system) / capacity * 100.0)
}

fn baseline<T>(read: Result<T, ProbeError>, name: &'static str) -> Option<T> {
    match read {
        Ok(value) => Some(value),
        Err(e) => {
            probe_failed(name, &e);
            None
        }
    }
}

fn probe_failed(series: &'static str, error: &ProbeError) {
    warn!("{} probe failed, skipping this tick: {}", series, error);
    counter!(PROBE_FAILURES_TOTAL, "series" => series).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Probe that replays scripted readings; `None` is a failed read.
    #[derive(Default)]
    struct ScriptedProbe {
        cpu: VecDeque<Option<CpuTimes>>,
        net: VecDeque<Option<NetTotals>>,
        disk: VecDeque<Option<DiskCounts>>,
        cores: usize,
    }

    fn next<T>(queue: &mut VecDeque<Option<T>>, name: &'static str) -> Result<T, ProbeError> {
        queue
            .pop_front()
            .flatten()
            .ok_or(ProbeError::Unsupported(name))
    }

    impl HostProbe for ScriptedProbe {
        fn cpu_times(&mut self) -> Result<CpuTimes, ProbeError> {
            next(&mut self.cpu, "cpu")
        }

        fn cpu_count(&mut self) -> usize {
            self.cores
        }

        fn network_totals(&mut self) -> Result<NetTotals, ProbeError> {
            next(&mut self.net, "network")
        }

        fn disk_counts(&mut self) -> Result<DiskCounts, ProbeError> {
            next(&mut self.disk, "disk")
        }
    }

    fn net(recv: u64, sent: u64) -> Option<NetTotals> {
        Some(NetTotals { recv, sent })
    }

    fn disk(reads: u64, writes: u64) -> Option<DiskCounts> {
        Some(DiskCounts { reads, writes })
    }

    fn cpu(user: f64, system: f64) -> Option<CpuTimes> {
        Some(CpuTimes { user, system })
    }

    fn values(records: &[Record]) -> Vec<f64> {
        records.iter().map(|r| r.value).collect()
    }

    fn sampler(probe: ScriptedProbe) -> Sampler<ScriptedProbe> {
        Sampler::new(probe, Arc::new(Analytics::new())).with_window(Duration::from_millis(10))
    }

    #[test]
    fn test_warm_up_series() {
        let now = chrono::Utc::now().timestamp();
        let analytics = Analytics::seeded_at(now);
        for series in Series::ALL {
            let records = analytics.series(series);
            assert_eq!(records.len(), SERIES_CAPACITY);
            assert!(records.iter().all(|r| r.value == 0.0));
            assert!(records.windows(2).all(|w| w[1].timestamp == w[0].timestamp + 1));
            assert_eq!(records.last().unwrap().timestamp, now - 1);
            assert_eq!(records.first().unwrap().timestamp, now - 100);
        }
    }

    #[test]
    fn test_ring_keeps_last_hundred() {
        let analytics = Analytics::seeded_at(1_000);
        for i in 0..250 {
            analytics.append_tick(1_000 + i, &[(Series::NetRecv, i as f64)]);
        }
        let records = analytics.net_recv();
        assert_eq!(records.len(), SERIES_CAPACITY);
        assert_eq!(records.first().unwrap().value, 150.0);
        assert_eq!(records.last().unwrap().value, 249.0);
        // Untouched series keep their seed.
        assert!(analytics.cpu_user().iter().all(|r| r.value == 0.0));
    }

    #[test]
    fn test_timestamps_stay_strictly_increasing() {
        let analytics = Analytics::seeded_at(1_000);
        let a = analytics.append_tick(1_000, &[(Series::DiskRead, 1.0)]);
        let b = analytics.append_tick(990, &[(Series::DiskRead, 2.0)]);
        assert_eq!(a, 1_000);
        assert_eq!(b, 1_001);
        let records = analytics.disk_read();
        assert!(records.windows(2).all(|w| w[1].timestamp > w[0].timestamp));
    }

    #[test]
    fn test_cpu_percent() {
        let (user, total) = cpu_percent(
            CpuTimes { user: 10.0, system: 5.0 },
            CpuTimes { user: 11.0, system: 5.5 },
            2,
            Duration::from_secs(1),
        );
        assert!((user - 50.0).abs() < 1e-9);
        assert!((total - 75.0).abs() < 1e-9);
        assert_eq!(
            cpu_percent(CpuTimes::default(), CpuTimes::default(), 4, Duration::ZERO),
            (0.0, 0.0)
        );
    }

    #[tokio::test]
    async fn test_deltas_follow_counter_sequence() {
        let probe = ScriptedProbe {
            cpu: [cpu(0.0, 0.0), cpu(0.01, 0.0), cpu(1.0, 1.0), cpu(1.0, 1.01)]
                .into_iter()
                .collect(),
            net: [net(100, 50), net(160, 50), net(400, 75)].into_iter().collect(),
            disk: [disk(7, 9), disk(8, 9), disk(20, 10)].into_iter().collect(),
            cores: 1,
        };
        let mut sampler = sampler(probe);
        let t1 = sampler.tick().await;
        let t2 = sampler.tick().await;
        assert!(t2 > t1);

        let analytics = sampler.analytics();
        let recv = analytics.net_recv();
        assert_eq!(values(&recv[98..]), vec![60.0, 240.0]);
        assert_eq!(values(&analytics.net_sent()[98..]), vec![0.0, 25.0]);
        assert_eq!(values(&analytics.disk_read()[98..]), vec![1.0, 12.0]);
        assert_eq!(values(&analytics.disk_write()[98..]), vec![0.0, 1.0]);

        let user = analytics.cpu_user();
        assert!((user[99].value - 0.0).abs() < 1e-6);
        assert!((user[98].value - 100.0).abs() < 1e-6);
        let total = analytics.cpu_total();
        assert!((total[99].value - 100.0).abs() < 1e-6);

        // One tick, one timestamp across series.
        assert_eq!(recv[99].timestamp, t2);
        assert_eq!(analytics.disk_write()[99].timestamp, t2);
        assert_eq!(user[99].timestamp, t2);
    }

    #[tokio::test]
    async fn test_counter_wrap_uses_unsigned_delta() {
        let probe = ScriptedProbe {
            net: [net(u64::MAX - 4, 0), net(5, 0)].into_iter().collect(),
            disk: [disk(0, 0), disk(0, 0)].into_iter().collect(),
            cores: 1,
            ..ScriptedProbe::default()
        };
        let mut sampler = sampler(probe);
        sampler.tick().await;
        assert_eq!(sampler.analytics().net_recv()[99].value, 10.0);
    }

    #[tokio::test]
    async fn test_failed_probe_skips_only_its_series() {
        let probe = ScriptedProbe {
            cpu: [cpu(0.0, 0.0), cpu(0.01, 0.0), cpu(0.01, 0.0), cpu(0.02, 0.0)]
                .into_iter()
                .collect(),
            net: [net(100, 100), None, net(130, 140)].into_iter().collect(),
            disk: [disk(1, 1), disk(2, 2), disk(3, 3)].into_iter().collect(),
            cores: 1,
        };
        let mut sampler = sampler(probe);
        let t1 = sampler.tick().await;
        sampler.tick().await;

        let analytics = sampler.analytics();
        let recv = analytics.net_recv();
        // Missed tick appended nothing; the next delta spans from the baseline.
        assert_eq!(recv[99].value, 30.0);
        assert_eq!(recv[98].value, 0.0);
        assert!(recv[98].timestamp < t1);
        assert_eq!(values(&analytics.net_sent()[99..]), vec![40.0]);
        assert_eq!(values(&analytics.disk_read()[98..]), vec![1.0, 1.0]);
        assert_eq!(analytics.cpu_user()[98].timestamp, t1);
    }

    #[tokio::test]
    async fn test_missing_baseline_uses_first_read() {
        let probe = ScriptedProbe {
            net: [None, net(500, 500), net(510, 520)].into_iter().collect(),
            disk: [disk(0, 0), disk(0, 0), disk(0, 0)].into_iter().collect(),
            cores: 1,
            ..ScriptedProbe::default()
        };
        let mut sampler = sampler(probe);
        let t1 = sampler.tick().await;
        assert!(sampler.analytics().net_recv()[99].timestamp < t1);

        sampler.tick().await;
        let analytics = sampler.analytics();
        assert_eq!(analytics.net_recv()[99].value, 10.0);
        assert_eq!(analytics.net_sent()[99].value, 20.0);
    }

    #[tokio::test]
    async fn test_snapshot_serializes_all_series() {
        let analytics = Analytics::seeded_at(5_000);
        let json = serde_json::to_value(analytics.snapshot()).unwrap();
        for key in ["cpu_user", "cpu_total", "net_recv", "net_sent", "disk_read", "disk_write"] {
            assert_eq!(json[key].as_array().unwrap().len(), SERIES_CAPACITY);
        }
        assert_eq!(json["cpu_user"][99]["timestamp"], 4_999);
    }
}
