pub mod ioreg;
pub mod system;

use crate::state::Reading;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("marker line has no '=': {line:?}")]
    MissingSeparator { line: String },
    #[error("marker line value {value:?} is not a percentage: {line:?}")]
    InvalidValue { line: String, value: String },
}

#[derive(Debug, Error)]
#[error("failed to read battery level of {device}: {source}")]
pub struct SampleError {
    pub device: String,
    #[source]
    pub source: ParseError,
}

/// Source of raw battery percentages for a device class.
///
/// A device that cannot be queried simply yields no values; only output that looks
/// like a reading but cannot be parsed is an error.
pub trait ReadingSource {
    fn sample(&self, device: &str) -> Result<Vec<u32>, ParseError>;
}

pub fn sample_all<S: ReadingSource>(
    source: &S,
    devices: &[String],
) -> Result<Vec<Reading>, SampleError> {
    let mut readings = Vec::new();
    for device in devices {
        let values = source.sample(device).map_err(|source| SampleError {
            device: device.clone(),
            source,
        })?;
        let taken_at = SystemTime::now();
        readings.extend(values.into_iter().map(|percent| Reading {
            device: device.clone(),
            percent,
            taken_at,
        }));
    }
    Ok(readings)
}
