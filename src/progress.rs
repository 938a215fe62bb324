//! Spinner display for long-running phases

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Simple spinner for phases with no measurable length (upstream fetches).
pub struct ProgressDisplay {
    spinner: ProgressBar,
}

impl ProgressDisplay {
    pub fn new(message: String) -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(100));
        Self { spinner }
    }

    pub fn update(&self, message: String) {
        self.spinner.set_message(message);
    }

    /// Finish and clear the spinner line.
    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    /// Abandon on error, leaving the last message visible.
    pub fn abandon(&self) {
        self.spinner.abandon();
    }
}
