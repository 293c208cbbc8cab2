mod collectors;
mod config;
mod holddown;
mod metrics;
mod monitor;
mod notify;
mod state;

use clap::{CommandFactory, Parser};
use collectors::ioreg::IoregSource;
use collectors::system::host_name;
use config::{Config, EmailSettings};
use holddown::Holddown;
use metrics::Metrics;
use monitor::{run_once, RunContext, RunOutcome};
use notify::SmtpNotifier;
use state::RunReport;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_FATAL: i32 = 2;

/// Bluetooth battery level checker
#[derive(Parser, Debug)]
#[command(name = "btbattery")]
#[command(version)]
struct Cli {
    /// Email address to send alert from and to
    #[arg(short, long)]
    email: Option<String>,
    /// Email relay server (must be able to relay email)
    #[arg(short, long)]
    server: Option<String>,
    /// YAML config file; built-in defaults are used without it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    /// Write Prometheus text metrics here after the run
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to load config");
                std::process::exit(EXIT_FATAL);
            }
        },
        None => Config::default(),
    };
    if let Some(email) = cli.email.clone() {
        cfg.email.address = Some(email);
    }
    if let Some(server) = cli.server.clone() {
        cfg.email.server = Some(server);
    }

    let settings = match cfg.email.resolve() {
        Some(settings) => settings,
        None => {
            warn!("Email address and/or Email relay server not given - no email will be sent");
            if let Err(err) = write_usage(&mut io::stdout()) {
                warn!(error = %err, "failed to print usage");
            }
            EmailSettings::placeholder(cfg.email.port)
        }
    };

    let window = match cfg.holddown.window() {
        Ok(window) => window,
        Err(err) => {
            error!(error = %err, "invalid holddown window");
            std::process::exit(EXIT_FATAL);
        }
    };

    let ctx = RunContext {
        host: host_name(),
        devices: cfg.devices.clone(),
        threshold_percent: cfg.threshold_percent,
    };
    info!(
        host = %ctx.host,
        devices = ctx.devices.len(),
        threshold_percent = ctx.threshold_percent,
        "checking bluetooth battery levels"
    );

    let source = IoregSource::new(&cfg.probe);
    let holddown = Holddown::new(cfg.holddown.lock_file.clone(), window);
    let notifier = SmtpNotifier::new(settings);

    let code = match run_once(&ctx, &source, &holddown, &notifier).await {
        Ok((report, outcome)) => {
            if let Some(path) = &cli.metrics_file {
                export_metrics(path, &ctx.host, &report, outcome);
            }
            outcome.exit_code()
        }
        Err(err) => {
            error!(error = %err, "battery check failed");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn write_usage(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{}", Cli::command().render_help())?;
    out.flush()
}

fn export_metrics(path: &Path, host: &str, report: &RunReport, outcome: RunOutcome) {
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            warn!(error = %err, "failed to initialise metrics");
            return;
        }
    };
    metrics.update_from_report(host, report);
    match outcome {
        RunOutcome::AlertSent(_) => metrics.record_alert_sent(),
        RunOutcome::Suppressed { .. } => metrics.record_alert_suppressed(),
        RunOutcome::AllClear => {}
    }
    if let Err(err) = metrics.write_textfile(path) {
        warn!(path = %path.display(), error = %err, "failed to write metrics file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_accepts_short_flags() {
        let cli = Cli::try_parse_from(["btbattery", "-e", "ops@example.org", "-s", "relay.local"])
            .expect("parse");
        assert_eq!(cli.email.as_deref(), Some("ops@example.org"));
        assert_eq!(cli.server.as_deref(), Some("relay.local"));
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_flags_are_optional() {
        let cli = Cli::try_parse_from(["btbattery"]).expect("parse");
        assert!(cli.email.is_none());
        assert!(cli.server.is_none());
        assert!(!cli.print_default_config);
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn usage_lists_email_flags() {
        let mut buf = Vec::new();
        write_usage(&mut buf).expect("write usage");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("--email"));
        assert!(text.contains("--server"));
    }

    #[test]
    fn usage_write_failure_is_reported() {
        let err = write_usage(&mut ClosedPipe).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
