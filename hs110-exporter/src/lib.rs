//! Prometheus exporter for TP-Link HS110/KP115 smart plug telemetry.
//!
//! This crate polls a single smart plug over its local protocol, decodes the
//! relay and energy meter readings and exposes them via an HTTP `/metrics`
//! endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Smart plug    │────>│     Poller      │────>│   HTTP Server   │
//! │  (tcp/9999)     │     │ (decode+gauges) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! TARGET_HS110=192.168.1.50 hs110-exporter
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod device;
pub mod http;
pub mod metrics;
pub mod poller;
pub mod telemetry;

pub use config::{ConfigError, ExporterConfig, LogFormat, LoggingConfig};
pub use device::{DeviceClient, FetchError, KasaClient};
pub use http::HttpServer;
pub use metrics::{PlugMetrics, SharedMetrics};
pub use poller::{PollError, PollOutcome, Poller};
pub use telemetry::{DecodeError, Reading, decode};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}
