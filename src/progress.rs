//! Progress display for transaction runs

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{ProgressCallback, ResourceRef, ResourceStatus};

/// Progress bar over the resources of one transaction
///
/// Failures are printed above the bar as they happen; everything else is
/// left for the summary.
pub struct BarProgress {
    bar: ProgressBar,
    label: &'static str,
}

impl BarProgress {
    pub fn new(label: &'static str) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            label,
        }
    }

    /// A bar that never draws, for `--quiet`
    pub fn hidden() -> Self {
        Self::new("")
    }
}

fn status_symbol(status: &ResourceStatus) -> colored::ColoredString {
    if status.failed || status.failed_to_restart {
        "✗".red()
    } else if status.skipped {
        "⊘".dimmed()
    } else if status.changed || status.restarted {
        "✓".green()
    } else {
        "○".dimmed()
    }
}

impl ProgressCallback for BarProgress {
    fn on_start(&mut self, total: usize) {
        if self.label.is_empty() {
            return;
        }
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_message(self.label);
        self.bar = bar;
    }

    fn on_resource_start(&mut self, resource: &ResourceRef) {
        self.bar.set_message(format!("{} {resource}", self.label));
    }

    fn on_resource_complete(&mut self, resource: &ResourceRef, status: &ResourceStatus) {
        if status.failed || status.failed_to_restart {
            self.bar
                .suspend(|| println!("  {} {resource}", status_symbol(status)));
        }
        self.bar.inc(1);
    }

    fn on_complete(&mut self) {
        self.bar.finish_and_clear();
    }
}
