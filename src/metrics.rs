//! Prometheus metrics for the host sampler.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines the metric name constants the sampler updates each tick.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// -- Metric name constants ----------------------------------------------------

/// CPU time spent in user mode over the last tick, percent of all cores (gauge).
pub const CPU_USER_PERCENT: &str = "nginx_ui_cpu_user_percent";

/// CPU time spent in user and system mode over the last tick (gauge).
pub const CPU_TOTAL_PERCENT: &str = "nginx_ui_cpu_total_percent";

/// Bytes received over the last tick, all interfaces (gauge).
pub const NET_RECV_BYTES: &str = "nginx_ui_net_recv_bytes";

/// Bytes sent over the last tick, all interfaces (gauge).
pub const NET_SENT_BYTES: &str = "nginx_ui_net_sent_bytes";

/// Completed disk reads over the last tick (gauge).
pub const DISK_READ_OPS: &str = "nginx_ui_disk_read_ops";

/// Completed disk writes over the last tick (gauge).
pub const DISK_WRITE_OPS: &str = "nginx_ui_disk_write_ops";

/// Failed host probe reads (counter). Labels: series.
pub const PROBE_FAILURES_TOTAL: &str = "nginx_ui_probe_failures_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Install the global recorder together with an HTTP scrape listener on
/// `addr`. Must run inside a Tokio runtime and instead of [`init_metrics`].
pub fn install_listener(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Register metric descriptions with the global recorder. Call once after
/// the recorder is installed.
pub fn describe_metrics() {
    describe_gauge!(CPU_USER_PERCENT, "CPU user time over the last tick, percent");
    describe_gauge!(
        CPU_TOTAL_PERCENT,
        "CPU user plus system time over the last tick, percent"
    );
    describe_gauge!(NET_RECV_BYTES, "Bytes received over the last tick");
    describe_gauge!(NET_SENT_BYTES, "Bytes sent over the last tick");
    describe_gauge!(DISK_READ_OPS, "Completed disk reads over the last tick");
    describe_gauge!(DISK_WRITE_OPS, "Completed disk writes over the last tick");
    describe_counter!(PROBE_FAILURES_TOTAL, "Failed host probe reads by series");
}
