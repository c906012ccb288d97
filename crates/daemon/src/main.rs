use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use gse_daemon::{config::load_config, server};
use gse_transport::{SimulationConnector, TransportSelector};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "gse_daemon", about = "Ground support telemetry relay")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, default_value = gse_daemon::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Listen address, overrides `bind_addr`
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Skip the hardware tiers and run the synthetic generator
    #[arg(long)]
    simulate: bool,

    /// Serial device to open instead of auto-detecting one
    #[arg(long)]
    serial_port: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gse_daemon=debug,relay=debug,gse_transport=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("GSE daemon starting...");

    let args = Args::parse();
    let mut config = load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(port) = args.serial_port {
        config.transport.serial.port = Some(port);
    }

    let selector = if args.simulate {
        tracing::info!("Using simulated telemetry");
        TransportSelector::simulation_only(SimulationConnector::from_config(
            &config.transport.simulation,
        ))
    } else {
        TransportSelector::from_config(&config.transport)
    };

    let shutdown = CancellationToken::new();
    let (state, supervisor) = server::start_relay(
        selector,
        config.supervisor.clone(),
        config.static_dir.clone(),
        shutdown.clone(),
    );

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("could not bind {}", config.bind_addr))?;
    let server_handle = tokio::spawn(server::run(listener, server::router(state), shutdown.clone()));

    wait_for_signal().await?;
    tracing::info!("Shutdown signal received. Stopping services...");
    shutdown.cancel();

    if let Err(e) = supervisor.await {
        tracing::error!("Relay supervisor task failed: {}", e);
    }
    server_handle.await??;
    tracing::info!("GSE daemon stopped gracefully.");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
