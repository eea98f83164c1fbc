//! onlyone - Single-instance guard
//!
//! Claims the single-instance lock for this executable, tells the user and
//! exits when another instance already holds it, and otherwise holds the
//! claim until shutdown.

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use onlyone::{
    DialogPresenter, FailurePolicy, FallbackNotifier, InstanceArbiter, Notice, Notifier, Settings,
    APP_NAME,
};

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "onlyone", version, about = "Run only if no other instance of this executable is running")]
struct Cli {
    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Prefix for the claim name
    #[arg(long)]
    app_prefix: Option<String>,

    /// Result to report when the lock facility fails: fail-open or fail-closed
    #[arg(long)]
    policy: Option<FailurePolicy>,

    /// Hash this path instead of the running executable's path
    #[arg(long)]
    identity_path: Option<PathBuf>,

    /// Write the "already running" notice to the console instead of a dialog
    #[arg(long)]
    console: bool,

    /// Seconds the notification dialog may block
    #[arg(long)]
    notify_timeout: Option<u64>,

    /// Release the claim and exit after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    hold: Option<u64>,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };

        if let Some(prefix) = &self.app_prefix {
            settings.app_prefix = prefix.clone();
        }
        if let Some(policy) = self.policy {
            settings.failure_policy = policy;
        }
        if let Some(path) = &self.identity_path {
            settings.identity_path = Some(path.clone());
        }
        if let Some(secs) = self.notify_timeout {
            settings.notify_timeout_secs = secs;
        }
        settings.console_only |= self.console;

        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    info!("{} v{} starting...", APP_NAME, APP_VERSION);

    let settings = cli.settings()?;
    let arbiter =
        InstanceArbiter::from_settings(&settings).context("Failed to create instance arbiter")?;

    let arbitration = arbiter.try_acquire();
    println!(
        "status={} claim={}",
        arbitration.result.label(),
        arbitration.claim_name
    );

    if let Some(code) = arbitration.exit_code() {
        if let Some(fault) = &arbitration.fault {
            warn!(
                "Refusing to start: claim check failed under {} policy ({})",
                settings.failure_policy.label(),
                fault
            );
        }
        if let Some(notice) = Notice::for_arbitration(APP_NAME, &arbitration) {
            show_notice(&settings, &notice);
        }
        drop(arbiter);
        std::process::exit(code);
    }

    wait_for_shutdown(cli.hold)?;

    arbiter.release();
    info!("{} shutting down", APP_NAME);
    Ok(())
}

/// Initialize the logging system. Stdout carries the status line and notices.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", APP_NAME)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Tell the user why startup was refused
fn show_notice(settings: &Settings, notice: &Notice) {
    let mut notifier =
        FallbackNotifier::new(DialogPresenter).with_timeout(settings.notify_timeout());
    if settings.console_only {
        notifier = notifier.console_only();
    }
    notifier.notify(notice);
}

/// Block until Ctrl+C, or until `hold` seconds have passed
fn wait_for_shutdown(hold: Option<u64>) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    match hold {
        Some(secs) => {
            if rx.recv_timeout(Duration::from_secs(secs)).is_ok() {
                info!("Interrupted, releasing claim");
            }
        }
        None => {
            info!("Holding claim, press Ctrl+C to exit");
            if rx.recv().is_err() {
                warn!("Shutdown signal channel closed");
            }
        }
    }
    Ok(())
}
