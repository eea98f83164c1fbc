//! Notifier - Tells the user that another instance is already running
//!
//! A [`Presenter`] gets the first try, on its own thread and bounded by a
//! timeout. If it is disabled, unavailable, panics, times out or fails, the
//! notice is written to the console as a fixed-format block that includes
//! the error.

pub mod console;
pub mod dialog;

use std::io::{self, Stdout, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::Arbitration;
use crate::error::NotifyError;

pub use dialog::DialogPresenter;

/// Default bound on how long a dialog may block
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A message for the user about a claim conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
    pub claim_name: String,
}

impl Notice {
    /// The standard "already running" notice
    pub fn already_running(app_name: &str, claim_name: &str) -> Self {
        Self {
            title: format!("{} is already running", app_name),
            message: format!(
                "Another instance of {} is already running from this installation. \
                 To run several instances at once, start each one from a separate \
                 copy of the installation.",
                app_name
            ),
            claim_name: claim_name.to_string(),
        }
    }

    /// Startup refused because the lock facility failed, not because of a conflict
    pub fn claim_unavailable(app_name: &str, claim_name: &str, fault: &str) -> Self {
        Self {
            title: format!("{} could not check for other instances", app_name),
            message: format!(
                "{} could not verify that it is the only running instance ({}). \
                 It is configured to refuse startup in this case.",
                app_name, fault
            ),
            claim_name: claim_name.to_string(),
        }
    }

    /// The notice for an arbitration that refuses startup, if any
    pub fn for_arbitration(app_name: &str, arbitration: &Arbitration) -> Option<Self> {
        arbitration.exit_code()?;
        Some(match &arbitration.fault {
            Some(fault) => Self::claim_unavailable(app_name, &arbitration.claim_name, fault),
            None => Self::already_running(app_name, &arbitration.claim_name),
        })
    }
}

/// How a notice reached the user
#[derive(Debug)]
pub enum NotifyOutcome {
    /// The rich presentation completed
    Presented,
    /// The console block was written instead
    FellBack(NotifyError),
}

/// Rich presentation of a notice, e.g. a modal dialog. May block.
pub trait Presenter: Send + Sync + 'static {
    fn present(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Anything able to deliver a notice. Never fails.
pub trait Notifier {
    fn notify(&self, notice: &Notice) -> NotifyOutcome;
}

/// Tries a presenter, then falls back to a console block
pub struct FallbackNotifier<P: Presenter, W: Write + Send = Stdout> {
    presenter: Option<Arc<P>>,
    timeout: Duration,
    console: Mutex<W>,
}

impl<P: Presenter> FallbackNotifier<P, Stdout> {
    pub fn new(presenter: P) -> Self {
        Self::with_console(presenter, io::stdout())
    }
}

impl<P: Presenter, W: Write + Send> FallbackNotifier<P, W> {
    pub fn with_console(presenter: P, console: W) -> Self {
        Self {
            presenter: Some(Arc::new(presenter)),
            timeout: DEFAULT_TIMEOUT,
            console: Mutex::new(console),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Skip the presenter; always write the console block
    pub fn console_only(mut self) -> Self {
        self.presenter = None;
        self
    }

    /// Hand back the console writer
    pub fn into_console(self) -> W {
        self.console
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn present_bounded(&self, presenter: &Arc<P>, notice: &Notice) -> Result<(), NotifyError> {
        let (tx, rx) = mpsc::channel();
        let presenter = Arc::clone(presenter);
        let owned = notice.clone();

        // The thread is detached; on timeout it is left to finish or die with the process
        thread::Builder::new()
            .name("onlyone-notify".to_string())
            .spawn(move || {
                let _ = tx.send(presenter.present(&owned));
            })
            .map_err(|e| NotifyError::Presentation(e.to_string()))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(NotifyError::TimedOut(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(NotifyError::Panicked),
        }
    }
}

impl<P: Presenter, W: Write + Send> Notifier for FallbackNotifier<P, W> {
    fn notify(&self, notice: &Notice) -> NotifyOutcome {
        let error = match &self.presenter {
            Some(presenter) => match self.present_bounded(presenter, notice) {
                Ok(()) => {
                    info!("Notified user about claim '{}'", notice.claim_name);
                    return NotifyOutcome::Presented;
                }
                Err(e) => e,
            },
            None => NotifyError::Disabled,
        };

        warn!("Dialog unavailable ({}), writing notice to console", error);
        let mut console = self.console.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = console::write_block(&mut *console, notice, &error) {
            warn!("Failed to write notice to console: {}", e);
        }
        NotifyOutcome::FellBack(error)
    }
}
