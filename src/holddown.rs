use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const LOCK_CONTENT: &str =
    "I am a lockfile to keep the BatteryPercentage app from sending too many emails!\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolddownDecision {
    /// No marker existed; it was created exclusively.
    Created,
    /// The marker was older than the window and has been rewritten.
    Refreshed { age: Duration },
    /// An alert went out within the window.
    Fresh { age: Duration },
}

/// Rate limit for alert emails, kept as the mtime of a marker file.
///
/// Creation uses `create_new`, so two first runs cannot both win. Refreshing an
/// expired marker is still check-then-write and two runs racing past the window
/// may both send.
#[derive(Debug, Clone)]
pub struct Holddown {
    path: PathBuf,
    window: Duration,
}

impl Holddown {
    pub fn new(path: impl Into<PathBuf>, window: Duration) -> Self {
        Self {
            path: path.into(),
            window,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn acquire(&self, now: SystemTime) -> io::Result<HolddownDecision> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                file.write_all(LOCK_CONTENT.as_bytes())?;
                return Ok(HolddownDecision::Created);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }

        let modified = fs::metadata(&self.path)?.modified()?;
        // mtime in the future (clock skew) counts as just sent
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > self.window {
            fs::write(&self.path, LOCK_CONTENT)?;
            Ok(HolddownDecision::Refreshed { age })
        } else {
            Ok(HolddownDecision::Fresh { age })
        }
    }
}
