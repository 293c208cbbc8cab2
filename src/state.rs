use std::time::SystemTime;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub device: String,
    pub percent: u32,
    pub taken_at: SystemTime,
}

/// Everything one run learned about the devices. Built once by [`evaluate`] and then
/// handed to the holddown, notifier and metrics stages.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub readings: Vec<Reading>,
    pub threshold_percent: u32,
    pub alert_needed: bool,
    pub message: String,
}

impl RunReport {
    pub fn devices_detected(&self) -> usize {
        self.readings.len()
    }

    pub fn below_threshold(&self) -> impl Iterator<Item = &Reading> + '_ {
        self.readings
            .iter()
            .filter(move |r| r.percent < self.threshold_percent)
    }
}

pub fn evaluate(host: &str, readings: Vec<Reading>, threshold_percent: u32) -> RunReport {
    let mut report = RunReport {
        threshold_percent,
        ..RunReport::default()
    };

    for reading in &readings {
        info!(
            at = %humantime::format_rfc3339_seconds(reading.taken_at),
            host = %host,
            device = %reading.device,
            percent = reading.percent,
            "Battery Level - {} - {}%",
            reading.device,
            reading.percent
        );

        if reading.percent < threshold_percent {
            warn!(device = %reading.device, percent = reading.percent, "Below threshold!");
            report.alert_needed = true;
            report.message.push_str(&alert_line(
                &reading.device,
                reading.percent,
                threshold_percent,
            ));
        }
    }

    report.readings = readings;
    info!(
        host = %host,
        devices = report.devices_detected(),
        "Battery Level - Devices Detected: {}",
        report.devices_detected()
    );
    report
}

fn alert_line(device: &str, percent: u32, threshold_percent: u32) -> String {
    format!("WARNING: Battery Level: {device}\t{percent}% -- under {threshold_percent}% <br>\n")
}
