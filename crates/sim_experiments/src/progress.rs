//! Injectable progress reporting for experiment execution.
//!
//! The reporter is passed into the dispatch path explicitly; workers call
//! [ProgressReporter::run_completed] from whichever thread finishes a run.
//! Reporting is advisory and never affects results.

use indicatif::{ProgressBar, ProgressStyle};

pub trait ProgressReporter: Send + Sync {
    /// Called once before the first run, with the total run count.
    fn begin(&mut self, total: usize) {
        let _ = total;
    }

    /// Called after each run completes, possibly from a worker thread.
    fn run_completed(&self) {}

    /// Called once after all runs finished and output was merged.
    fn finish(&mut self) {}
}

/// Terminal progress bar with elapsed time and ETA.
#[derive(Default)]
pub struct ConsoleProgress {
    bar: Option<ProgressBar>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for ConsoleProgress {
    fn begin(&mut self, total: usize) {
        if total == 0 {
            return;
        }
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        self.bar = Some(bar);
    }

    fn run_completed(&self) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message("Completed");
        }
    }
}

/// No-op reporter for tests and embedding.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_reporter_tolerates_empty_run_set() {
        let mut reporter = ConsoleProgress::new();
        reporter.begin(0);
        reporter.run_completed();
        reporter.finish();
    }
}
