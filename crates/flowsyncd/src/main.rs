//! Flow Synchronization Daemon
//!
//! Main entry point for flowsyncd. Maintains the OpenFlow channel to the
//! local switch and reconciles desired flow and group state into it once
//! per tick. Flow producers (the logical-network rule compiler) drive the
//! library API; this binary provides the event loop, configuration, and
//! the metrics endpoint.

use clap::Parser;
use std::path::PathBuf;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use vnet_flowsyncd::{AgentConfig, FlowsyncError, GroupTable, MetricsCollector, Ofctrl, Result};

#[derive(Debug, Parser)]
#[command(name = "flowsyncd", version, about = "OpenFlow flow synchronization daemon")]
struct Args {
    /// Integration bridge to program (e.g. "br-int").
    bridge: String,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Runtime directory holding the switch management sockets.
    #[arg(long)]
    rundir: Option<PathBuf>,

    /// Serve Prometheus metrics on this port.
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Main-loop tick interval in milliseconds.
    #[arg(long)]
    tick_interval_ms: Option<u64>,
}

impl Args {
    /// Resolves the effective configuration: file first, flags override.
    fn into_config(self) -> Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let mut loaded = AgentConfig::load(path)?;
                loaded.bridge = self.bridge;
                loaded
            }
            None => AgentConfig::for_bridge(self.bridge),
        };
        if let Some(rundir) = self.rundir {
            config.rundir = rundir;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = Some(port);
        }
        if let Some(tick) = self.tick_interval_ms {
            config.tick_interval_ms = tick;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_logging()?;

    let config = Args::parse().into_config()?;
    info!(
        bridge = %config.bridge,
        rundir = %config.rundir.display(),
        "flowsyncd: starting flow synchronization daemon"
    );

    match run_daemon(config).await {
        Ok(()) => {
            info!("flowsyncd: daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "flowsyncd: daemon exiting with error");
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}

/// Initializes structured logging.
fn init_logging() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| FlowsyncError::config(format!("failed to set logger: {}", e)))
}

/// The main daemon loop: one `run` + `put` cycle per tick.
async fn run_daemon(config: AgentConfig) -> Result<()> {
    let mut ofctrl = Ofctrl::new(&config)?;
    let mut groups = GroupTable::new();

    if let Some(port) = config.metrics_port {
        let metrics = ofctrl.metrics().clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(metrics, port).await {
                error!(error = %e, port, "flowsyncd: metrics server failed");
            }
        });
    }

    let mut ticker = tokio::time::interval(config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tun_field = 0u16;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("flowsyncd: received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                let field = ofctrl.run(Some(&config.bridge));
                if field != tun_field {
                    if field == 0 {
                        info!("flowsyncd: Geneve tunnel metadata unavailable");
                    } else {
                        info!(field_id = field, "flowsyncd: negotiated Geneve tunnel metadata field");
                    }
                    tun_field = field;
                }
                ofctrl.put(&mut groups);
            }
        }
    }

    info!("flowsyncd: graceful shutdown complete");
    Ok(())
}

/// Serves the Prometheus text endpoint.
async fn serve_metrics(metrics: MetricsCollector, port: u16) -> Result<()> {
    use axum::{extract::State, routing::get, Router};

    async fn handler(State(metrics): State<MetricsCollector>) -> String {
        metrics.gather_text()
    }

    let app = Router::new()
        .route("/metrics", get(handler))
        .with_state(metrics);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "flowsyncd: metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
