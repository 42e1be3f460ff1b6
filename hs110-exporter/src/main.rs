//! Prometheus exporter for HS110/KP115 smart plugs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use hs110_exporter::{ExporterConfig, HttpServer, KasaClient, PlugMetrics, Poller};

/// Prometheus exporter for HS110/KP115 smart plugs.
#[derive(Parser, Debug)]
#[command(name = "hs110-exporter")]
#[command(about = "Export HS110/KP115 smart plug telemetry as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Plug hostname or IP (overrides TARGET_HS110 and config).
    #[arg(long)]
    target: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path))?
    } else {
        ExporterConfig::default()
    };

    config.apply_env();

    if let Some(target) = args.target {
        config.device.target = target;
    }
    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    hs110_exporter::init_tracing(&config.logging)?;

    info!(
        target_device = %config.device.target,
        "Starting HS110 exporter"
    );

    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(PlugMetrics::new());

    // Binding is the only fatal runtime error
    let http_server = HttpServer::new(
        metrics.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    )
    .bind()
    .await?;

    let poller = Poller::new(
        KasaClient::from_config(&config.device),
        config.device.target.clone(),
        metrics.clone(),
        &config.poller,
    );
    let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));

    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        error!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = poller_task.await;
        let _ = http_task.await;
    })
    .await;

    let stats = metrics.stats();
    info!(
        readings_published = stats.readings_published,
        unmetered_readings = stats.unmetered_readings,
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}
