//! Native message dialog presenter

use std::ffi::OsString;

use tracing::debug;

use super::{Notice, Presenter};
use crate::error::NotifyError;

/// Shows a blocking warning dialog through the platform's native toolkit
#[derive(Debug, Clone, Copy, Default)]
pub struct DialogPresenter;

impl Presenter for DialogPresenter {
    fn present(&self, notice: &Notice) -> Result<(), NotifyError> {
        if !graphical_session_available(|var| std::env::var_os(var)) {
            return Err(NotifyError::Unavailable);
        }

        debug!("Showing dialog '{}'", notice.title);
        let _ = rfd::MessageDialog::new()
            .set_level(rfd::MessageLevel::Warning)
            .set_title(notice.title.as_str())
            .set_description(notice.message.as_str())
            .set_buttons(rfd::MessageButtons::Ok)
            .show();
        Ok(())
    }
}

/// Whether a dialog can be shown from the notifier's worker thread.
///
/// AppKit only runs synchronous dialogs on the main thread, so macOS always
/// uses the console. X11 and Wayland sessions advertise themselves through
/// the environment.
fn graphical_session_available<F>(env: F) -> bool
where
    F: Fn(&str) -> Option<OsString>,
{
    if cfg!(target_os = "macos") {
        return false;
    }
    if cfg!(windows) {
        return true;
    }
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|var| env(var).is_some_and(|value| !value.is_empty()))
}
