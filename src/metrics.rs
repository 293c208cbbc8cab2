use crate::state::RunReport;
use prometheus::core::Collector;
use prometheus::{opts, Counter, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("failed to write metrics file: {0}")]
    Io(#[from] io::Error),
}

/// Per-run gauges for the node_exporter textfile collector.
pub struct Metrics {
    registry: Registry,
    pub battery_percent: GaugeVec,
    pub devices_detected: Gauge,
    pub devices_below_threshold: Gauge,
    pub threshold_percent: Gauge,
    pub alerts_sent_total: Counter,
    pub alerts_suppressed_total: Counter,
    pub last_run_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let battery_percent = GaugeVec::new(
            opts!(
                "btbattery_battery_percent",
                "Battery level reported by a Bluetooth device in percent"
            ),
            &["device", "index", "host"],
        )?;
        let devices_detected = Gauge::with_opts(opts!(
            "btbattery_devices_detected",
            "Number of battery readings found in this run"
        ))?;
        let devices_below_threshold = Gauge::with_opts(opts!(
            "btbattery_devices_below_threshold",
            "Number of readings under the alert threshold"
        ))?;
        let threshold_percent = Gauge::with_opts(opts!(
            "btbattery_threshold_percent",
            "Configured alert threshold in percent"
        ))?;
        let alerts_sent_total = Counter::with_opts(opts!(
            "btbattery_alerts_sent_total",
            "Alert emails sent by this run (0 or 1)"
        ))?;
        let alerts_suppressed_total = Counter::with_opts(opts!(
            "btbattery_alerts_suppressed_total",
            "Alerts held back by the holddown window in this run (0 or 1)"
        ))?;
        let last_run_timestamp_seconds = Gauge::with_opts(opts!(
            "btbattery_last_run_timestamp_seconds",
            "Unix time the run finished"
        ))?;

        register(&registry, &battery_percent)?;
        register(&registry, &devices_detected)?;
        register(&registry, &devices_below_threshold)?;
        register(&registry, &threshold_percent)?;
        register(&registry, &alerts_sent_total)?;
        register(&registry, &alerts_suppressed_total)?;
        register(&registry, &last_run_timestamp_seconds)?;

        Ok(Self {
            registry,
            battery_percent,
            devices_detected,
            devices_below_threshold,
            threshold_percent,
            alerts_sent_total,
            alerts_suppressed_total,
            last_run_timestamp_seconds,
        })
    }

    pub fn update_from_report(&self, host: &str, report: &RunReport) {
        self.battery_percent.reset();
        // one class (e.g. BNBTrackpadDevice) can report several devices
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for reading in &report.readings {
            let index = seen.entry(reading.device.as_str()).or_insert(0);
            let label = index.to_string();
            self.battery_percent
                .with_label_values(&[reading.device.as_str(), label.as_str(), host])
                .set(reading.percent as f64);
            *index += 1;
        }
        self.devices_detected.set(report.devices_detected() as f64);
        self.devices_below_threshold
            .set(report.below_threshold().count() as f64);
        self.threshold_percent.set(report.threshold_percent as f64);
        self.last_run_timestamp_seconds.set(now_unix() as f64);
    }

    pub fn record_alert_sent(&self) {
        self.alerts_sent_total.inc();
    }

    pub fn record_alert_suppressed(&self) {
        self.alerts_suppressed_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    /// Writes next to the target and renames, so a collector never reads a partial file.
    pub fn write_textfile(&self, path: &Path) -> Result<(), MetricsError> {
        let encoded = self.encode_metrics()?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
