use crate::collectors::{sample_all, ReadingSource, SampleError};
use crate::holddown::{Holddown, HolddownDecision};
use crate::notify::{Alert, Notifier, NotifyError};
use crate::state::{evaluate, RunReport};
use std::io;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error("lockfile {path}: {source}")]
    Holddown { path: String, source: io::Error },
    #[error("failed to send alert email: {0}")]
    Notify(#[from] NotifyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    AllClear,
    AlertSent(HolddownDecision),
    Suppressed { age: Duration },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AllClear | Self::AlertSent(_) => 0,
            Self::Suppressed { .. } => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub host: String,
    pub devices: Vec<String>,
    pub threshold_percent: u32,
}

/// One pass: sample every device, evaluate, and alert at most once.
pub async fn run_once<S, N>(
    ctx: &RunContext,
    source: &S,
    holddown: &Holddown,
    notifier: &N,
) -> Result<(RunReport, RunOutcome), RunError>
where
    S: ReadingSource,
    N: Notifier,
{
    let readings = sample_all(source, &ctx.devices)?;
    let report = evaluate(&ctx.host, readings, ctx.threshold_percent);

    if !report.alert_needed {
        return Ok((report, RunOutcome::AllClear));
    }

    let decision = holddown
        .acquire(SystemTime::now())
        .map_err(|source| RunError::Holddown {
            path: holddown.path().display().to_string(),
            source,
        })?;

    match decision {
        HolddownDecision::Fresh { age } => {
            warn!(
                lockfile = %holddown.path().display(),
                age = %humantime::format_duration(truncate_secs(age)),
                "Lockfile still fresh - exiting"
            );
            return Ok((report, RunOutcome::Suppressed { age }));
        }
        HolddownDecision::Created => {
            info!(lockfile = %holddown.path().display(), "lockfile created");
        }
        HolddownDecision::Refreshed { age } => {
            info!(
                lockfile = %holddown.path().display(),
                age = %humantime::format_duration(truncate_secs(age)),
                "lockfile expired, refreshed"
            );
        }
    }

    info!("Sending email");
    let alert = Alert {
        host: ctx.host.clone(),
        body: report.message.clone(),
    };
    notifier.notify(&alert).await?;

    Ok((report, RunOutcome::AlertSent(decision)))
}

fn truncate_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::ParseError;
    use crate::holddown::LOCK_CONTENT;
    use std::collections::HashMap;
    use std::fs::{self, File};
    use std::path::Path;
    use std::sync::Mutex;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    struct FixedSource(HashMap<&'static str, Vec<u32>>);

    impl ReadingSource for FixedSource {
        fn sample(&self, device: &str) -> Result<Vec<u32>, ParseError> {
            Ok(self.0.get(device).cloned().unwrap_or_default())
        }
    }

    struct BrokenSource;

    impl ReadingSource for BrokenSource {
        fn sample(&self, _device: &str) -> Result<Vec<u32>, ParseError> {
            Err(ParseError::InvalidValue {
                line: "\"BatteryPercent\" = ?".to_string(),
                value: "?".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Alert>>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<Alert> {
            self.sent.lock().expect("lock").clone()
        }
    }

    impl Notifier for RecordingNotifier {
        async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
            self.sent.lock().expect("lock").push(alert.clone());
            Ok(())
        }
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        async fn notify(&self, _alert: &Alert) -> Result<(), NotifyError> {
            Err(NotifyError::Build("relay rejected message".to_string()))
        }
    }

    fn ctx() -> RunContext {
        RunContext {
            host: "mac-mini".to_string(),
            devices: vec![
                "AppleBluetoothHIDKeyboard".to_string(),
                "BNBTrackpadDevice".to_string(),
            ],
            threshold_percent: 40,
        }
    }

    fn low_keyboard() -> FixedSource {
        FixedSource(HashMap::from([
            ("AppleBluetoothHIDKeyboard", vec![35]),
            ("BNBTrackpadDevice", vec![80]),
        ]))
    }

    fn lock_aged(path: &Path, age: Duration) {
        fs::write(path, LOCK_CONTENT).expect("write lock");
        let file = File::options().write(true).open(path).expect("open lock");
        file.set_modified(SystemTime::now() - age).expect("set mtime");
    }

    #[tokio::test]
    async fn no_low_battery_leaves_lockfile_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let holddown = Holddown::new(dir.path().join("battery.lock"), 12 * HOUR);
        let source = FixedSource(HashMap::from([
            ("AppleBluetoothHIDKeyboard", vec![75]),
            ("BNBTrackpadDevice", vec![40]),
        ]));
        let notifier = RecordingNotifier::default();

        let (report, outcome) = run_once(&ctx(), &source, &holddown, &notifier)
            .await
            .expect("run");

        assert_eq!(outcome, RunOutcome::AllClear);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(report.devices_detected(), 2);
        assert!(!holddown.path().exists());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn first_alert_creates_lock_and_sends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let holddown = Holddown::new(dir.path().join("battery.lock"), 12 * HOUR);
        let notifier = RecordingNotifier::default();

        let (_, outcome) = run_once(&ctx(), &low_keyboard(), &holddown, &notifier)
            .await
            .expect("run");

        assert_eq!(outcome, RunOutcome::AlertSent(HolddownDecision::Created));
        assert_eq!(outcome.exit_code(), 0);
        assert!(holddown.path().exists());

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].host, "mac-mini");
        assert!(sent[0].body.contains("AppleBluetoothHIDKeyboard"));
        assert!(sent[0].body.contains("35"));
        assert!(!sent[0].body.contains("BNBTrackpadDevice"));
    }

    #[tokio::test]
    async fn fresh_lock_suppresses_with_exit_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let holddown = Holddown::new(dir.path().join("battery.lock"), 12 * HOUR);
        lock_aged(holddown.path(), HOUR);
        let notifier = RecordingNotifier::default();

        let (_, outcome) = run_once(&ctx(), &low_keyboard(), &holddown, &notifier)
            .await
            .expect("run");

        assert!(matches!(outcome, RunOutcome::Suppressed { .. }));
        assert_eq!(outcome.exit_code(), 1);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn stale_lock_is_refreshed_and_alert_sent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let holddown = Holddown::new(dir.path().join("battery.lock"), 12 * HOUR);
        lock_aged(holddown.path(), 13 * HOUR);
        let notifier = RecordingNotifier::default();

        let (_, outcome) = run_once(&ctx(), &low_keyboard(), &holddown, &notifier)
            .await
            .expect("run");

        assert!(matches!(
            outcome,
            RunOutcome::AlertSent(HolddownDecision::Refreshed { .. })
        ));
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(notifier.sent().len(), 1);

        let modified = fs::metadata(holddown.path())
            .and_then(|m| m.modified())
            .expect("mtime");
        assert!(SystemTime::now().duration_since(modified).unwrap_or_default() < HOUR);
    }

    #[tokio::test]
    async fn many_low_devices_send_one_email() {
        let dir = tempfile::tempdir().expect("tempdir");
        let holddown = Holddown::new(dir.path().join("battery.lock"), 12 * HOUR);
        let source = FixedSource(HashMap::from([
            ("AppleBluetoothHIDKeyboard", vec![5]),
            ("BNBTrackpadDevice", vec![10, 20]),
        ]));
        let notifier = RecordingNotifier::default();

        run_once(&ctx(), &source, &holddown, &notifier)
            .await
            .expect("first run");
        let (_, second) = run_once(&ctx(), &source, &holddown, &notifier)
            .await
            .expect("second run");

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body.lines().count(), 3);
        assert_eq!(second.exit_code(), 1);
    }

    #[tokio::test]
    async fn malformed_reading_aborts_before_lockfile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let holddown = Holddown::new(dir.path().join("battery.lock"), 12 * HOUR);
        let notifier = RecordingNotifier::default();

        let err = run_once(&ctx(), &BrokenSource, &holddown, &notifier)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Sample(_)));
        assert!(!holddown.path().exists());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn relay_failure_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let holddown = Holddown::new(dir.path().join("battery.lock"), 12 * HOUR);

        let err = run_once(&ctx(), &low_keyboard(), &holddown, &FailingNotifier)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Notify(_)));
    }
}
