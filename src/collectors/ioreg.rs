use super::{ParseError, ReadingSource};
use crate::config::ProbeConfig;
use std::process::Command;
use tracing::debug;

/// Queries the I/O registry (`ioreg -c <class>`) once per device class.
#[derive(Debug, Clone)]
pub struct IoregSource {
    command: String,
    args: Vec<String>,
    marker: String,
    max_line_len: usize,
}

impl IoregSource {
    pub fn new(cfg: &ProbeConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            args: cfg.args.clone(),
            marker: cfg.marker.clone(),
            max_line_len: cfg.max_line_len,
        }
    }

    fn run(&self, device: &str) -> Option<String> {
        let output = match Command::new(&self.command)
            .args(&self.args)
            .arg(device)
            .output()
        {
            Ok(output) => output,
            Err(err) => {
                debug!(command = %self.command, device = %device, error = %err, "probe command failed to start");
                return None;
            }
        };

        if !output.stderr.is_empty() {
            debug!(
                device = %device,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "probe command wrote to stderr"
            );
        }
        if !output.status.success() {
            debug!(device = %device, status = %output.status, "probe command exited with failure");
        }

        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ReadingSource for IoregSource {
    fn sample(&self, device: &str) -> Result<Vec<u32>, ParseError> {
        let Some(text) = self.run(device) else {
            return Ok(Vec::new());
        };
        parse_battery_lines(&text, &self.marker, self.max_line_len)
    }
}

/// Extracts `key = value` percentages from lines carrying `marker`.
///
/// Only lines shorter than `max_line_len` bytes count; longer lines are usually
/// property dumps that mention the marker in passing.
pub fn parse_battery_lines(
    text: &str,
    marker: &str,
    max_line_len: usize,
) -> Result<Vec<u32>, ParseError> {
    text.lines()
        .filter(|line| line.contains(marker) && line.len() < max_line_len)
        .map(parse_marker_line)
        .collect()
}

fn parse_marker_line(line: &str) -> Result<u32, ParseError> {
    let Some((_, value)) = line.split_once('=') else {
        return Err(ParseError::MissingSeparator {
            line: line.to_string(),
        });
    };
    let value = value.trim();
    value.parse::<u32>().map_err(|_| ParseError::InvalidValue {
        line: line.to_string(),
        value: value.to_string(),
    })
}
