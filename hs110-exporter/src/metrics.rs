//! Prometheus gauges for plug readings.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::{error, trace};

use crate::telemetry::Reading;

/// Gauge holding an `f64` value.
type FloatGauge = Gauge<f64, AtomicU64>;

/// Label set identifying one plug time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct PlugLabels {
    /// Target hostname or IP the plug was polled at.
    pub target: String,
    /// MAC address of the plug.
    pub mac: String,
    /// Plug alias.
    pub alias: String,
}

impl PlugLabels {
    /// Build the label set for a reading polled from `target`.
    pub fn new(target: &str, reading: &Reading) -> Self {
        Self {
            target: target.to_string(),
            mac: reading.mac.clone(),
            alias: reading.alias.clone(),
        }
    }
}

/// Publisher statistics.
#[derive(Debug, Clone, Default)]
pub struct PublisherStats {
    /// Readings published.
    pub readings_published: u64,
    /// Readings published without energy metering.
    pub unmetered_readings: u64,
}

/// The exporter's metric set.
///
/// Owns the registry and the six gauge families. Created once at startup and
/// shared between the poller, which writes through [`PlugMetrics::publish`],
/// and the HTTP handler, which reads through [`PlugMetrics::render`].
pub struct PlugMetrics {
    registry: Registry,
    relay_state: Family<PlugLabels, FloatGauge>,
    on_time: Family<PlugLabels, FloatGauge>,
    voltage: Family<PlugLabels, FloatGauge>,
    current: Family<PlugLabels, FloatGauge>,
    power: Family<PlugLabels, FloatGauge>,
    total_watt_hours: Family<PlugLabels, FloatGauge>,
    stats: RwLock<PublisherStats>,
}

impl PlugMetrics {
    /// Create the metric set and register every gauge.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let relay_state = Family::<PlugLabels, FloatGauge>::default();
        let on_time = Family::<PlugLabels, FloatGauge>::default();
        let voltage = Family::<PlugLabels, FloatGauge>::default();
        let current = Family::<PlugLabels, FloatGauge>::default();
        let power = Family::<PlugLabels, FloatGauge>::default();
        let total_watt_hours = Family::<PlugLabels, FloatGauge>::default();

        registry.register(
            "hs110_relay_state",
            "Plug On or Off state",
            relay_state.clone(),
        );
        registry.register(
            "hs110_on_time",
            "The number of seconds from the last relay_state change to On",
            on_time.clone(),
        );
        registry.register(
            "hs110_voltage_milivolts",
            "The number of voltage millivolts passing through HS110 in the last minute",
            voltage.clone(),
        );
        registry.register(
            "hs110_current_miliamps",
            "The number of current milliamps passing through HS110 in the last minute",
            current.clone(),
        );
        registry.register(
            "hs110_power_milliwatts",
            "The number of power milliwatts passing through HS110 in the last minute",
            power.clone(),
        );
        registry.register(
            "hs110_total_watthours",
            "Total number of watt hours passing through HS110 from last check",
            total_watt_hours.clone(),
        );

        Self {
            registry,
            relay_state,
            on_time,
            voltage,
            current,
            power,
            total_watt_hours,
            stats: RwLock::new(PublisherStats::default()),
        }
    }

    /// Publish a reading polled from `target`.
    ///
    /// Relay state and on-time are always set. The energy gauges are only set
    /// when the reading reports metering, so a plug without a metering chip
    /// never exposes them.
    pub fn publish(&self, target: &str, reading: &Reading) {
        let labels = PlugLabels::new(target, reading);

        self.relay_state
            .get_or_create(&labels)
            .set(f64::from(reading.relay_state));
        self.on_time
            .get_or_create(&labels)
            .set(reading.on_time as f64);

        let metered = reading.supports_metering();
        if metered {
            self.total_watt_hours
                .get_or_create(&labels)
                .set(reading.total_wh as f64);
            self.voltage
                .get_or_create(&labels)
                .set(reading.voltage_mv as f64);
            self.current
                .get_or_create(&labels)
                .set(reading.current_ma as f64);
            self.power
                .get_or_create(&labels)
                .set(reading.power_mw as f64);
        }

        trace!(
            device = %labels.target,
            mac = %labels.mac,
            alias = %labels.alias,
            metered,
            "Reading published"
        );

        let mut stats = self.stats.write();
        stats.readings_published += 1;
        if !metered {
            stats.unmetered_readings += 1;
        }
    }

    /// Get publisher statistics.
    pub fn stats(&self) -> PublisherStats {
        self.stats.read().clone()
    }

    /// Render all gauges in the OpenMetrics text format.
    pub fn render(&self) -> String {
        let mut output = String::new();
        if let Err(e) = encode(&mut output, &self.registry) {
            error!("Failed to encode metrics: {}", e);
        }
        output
    }
}

impl Default for PlugMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a shareable metrics handle.
pub type SharedMetrics = Arc<PlugMetrics>;
