//! nginx-ui settings daemon.
//!
//! Loads `app.ini` from the data directory (migrating a legacy layout on the
//! way), then runs the host analytics sampler until SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;

use nginx_ui_settings::analytics;
use nginx_ui_settings::config::ServerSettings;
use nginx_ui_settings::probe::SystemProbe;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Command-line arguments for the settings daemon.
#[derive(Parser, Debug)]
#[command(
    name = "nginx-ui-settings",
    version,
    about = "nginx-ui settings core and host analytics sampler"
)]
struct Cli {
    /// Directory holding app.ini.
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this address (host:port).
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Do not start the analytics sampler.
    #[arg(long)]
    no_sampler: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing / logging.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!("Loading settings from {}", cli.data_dir.display());
    let settings = nginx_ui_settings::init(&cli.data_dir)?;
    let server = settings.get::<ServerSettings>();
    info!(
        "Settings ready: source={} listen={} run_mode={}",
        settings.source().display(),
        server.addr(),
        server.run_mode
    );

    match cli.metrics_addr {
        Some(addr) => {
            nginx_ui_settings::metrics::install_listener(addr)?;
            info!("Prometheus metrics listening on {}", addr);
        }
        None => {
            nginx_ui_settings::metrics::init_metrics();
        }
    }
    nginx_ui_settings::metrics::describe_metrics();

    let sampler = if cli.no_sampler {
        info!("Analytics sampler disabled");
        None
    } else {
        let (_analytics, handle) = analytics::spawn(SystemProbe::new());
        info!("Analytics sampler started");
        Some(handle)
    };

    let signal = shutdown_signal().await;
    info!("{} received, stopping", signal);

    if let Some(handle) = sampler {
        handle.abort();
        info!("Analytics sampler stopped");
    }
    info!("nginx-ui settings daemon shut down");

    Ok(())
}

/// Resolve on SIGTERM or SIGINT and name the signal that fired.
async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
