//! Progress indicators for long-running CLI operations.
//!
//! Spinners and progress bars on top of `indicatif`. Indicators are hidden
//! when stdout is not a TTY, with `--quiet`, and for `--json` output.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Progress feedback mode based on output context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Interactive TTY: show animated spinners and progress bars
    Interactive,
    /// Non-TTY or quiet: suppress progress, show only final results
    Quiet,
    /// Machine-readable: no progress at all (for --json)
    Silent,
}

impl ProgressMode {
    /// Detect the appropriate mode from environment and flags.
    pub fn detect(quiet: bool, json: bool) -> Self {
        if json {
            Self::Silent
        } else if quiet || !std::io::stdout().is_terminal() {
            Self::Quiet
        } else {
            Self::Interactive
        }
    }

    /// Check if progress should be shown.
    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::Interactive)
    }
}

/// Spinner tick characters (Braille-based).
const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Progress bar characters.
const BAR_CHARS: &str = "█░";

/// A progress indicator that wraps indicatif.
///
/// Cloning shares the underlying bar, so a clone can be moved into an event
/// handler while the original finishes it.
#[derive(Clone)]
pub struct Progress {
    bar: ProgressBar,
    mode: ProgressMode,
}

impl Progress {
    /// Create a spinner for indeterminate operations.
    pub fn spinner(message: &str, mode: ProgressMode) -> Self {
        let bar = if mode.is_interactive() {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} ({elapsed})")
            {
                pb.set_style(style.tick_chars(SPINNER_CHARS));
            }
            pb.set_message(message.to_string());
            pb.enable_steady_tick(Duration::from_millis(80));
            pb
        } else {
            ProgressBar::hidden()
        };

        Self { bar, mode }
    }

    /// Create a progress bar for determinate operations.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let progress = Progress::bar(total, "Copying docs", mode);
    /// progress.set_position(copied);
    /// progress.finish_clear();
    /// ```
    pub fn bar(total: u64, message: &str, mode: ProgressMode) -> Self {
        let bar = if mode.is_interactive() {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{bar:20.cyan/dim}] {percent:>3}% ({pos}/{len}) {msg} ({elapsed})")
            {
                pb.set_style(style.progress_chars(BAR_CHARS));
            }
            pb.set_message(message.to_string());
            pb
        } else {
            ProgressBar::hidden()
        };

        Self { bar, mode }
    }

    /// Update the message while running.
    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    /// Set the current position (for bars).
    pub fn set_position(&self, pos: u64) {
        self.bar.set_position(pos);
    }

    /// Grow the bar when the source turns out larger than announced.
    pub fn ensure_length(&self, len: u64) {
        if self.bar.length().is_some_and(|current| current < len) {
            self.bar.set_length(len);
        }
    }

    /// Finish and clear the progress line.
    pub fn finish_clear(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_is_silent() {
        assert_eq!(ProgressMode::detect(false, true), ProgressMode::Silent);
        assert_eq!(ProgressMode::detect(true, false), ProgressMode::Quiet);
    }

    #[test]
    fn test_hidden_bar_accepts_updates() {
        let progress = Progress::bar(10, "copy", ProgressMode::Quiet);
        progress.set_position(5);
        progress.ensure_length(20);
        progress.set_message("still copying");
        progress.finish_clear();
    }
}
