//! Execution engine - runs catalogs against this machine with UI integration

use anyhow::{Context as AnyhowContext, Result};
use reconcile::{
    CommandRunner, MemoryStorage, Probe, ProgressCallback, Report, ResourceDecl, Storage,
    Transaction, TransactionOptions, TypeRegistry,
};
use std::fs;
use std::path::{Path, PathBuf};

use crate::Context;
use crate::config::Settings;
use crate::facts::SystemProbe;
use crate::progress::BarProgress;
use crate::resource;
use crate::runner::SystemRunner;
use crate::state::StateFile;
use crate::ui;

use super::differ::{display_changes, pending_changes, print_summary};

/// Options for `apply` and `plan`; unset values fall back to settings
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Simulate changes instead of making them
    pub noop: bool,
    /// Skip the confirmation prompt
    pub yes: bool,
    /// Compute content diffs; overrides settings when given
    pub show_diff: Option<bool>,
    /// Write the JSON report here instead of the report directory
    pub report: Option<PathBuf>,
    /// Only evaluate resources with one of these tags
    pub tags: Vec<String>,
}

/// Everything one transaction needs from the host
struct Host<'a> {
    registry: &'a TypeRegistry,
    runner: &'a dyn CommandRunner,
    probe: &'a dyn Probe,
}

impl Host<'_> {
    fn run(
        &self,
        decls: Vec<ResourceDecl>,
        storage: &mut dyn Storage,
        options: TransactionOptions,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Report> {
        let catalog = super::build_catalog(self.registry, decls)?;
        let report = Transaction::new(catalog, self.registry, self.runner, self.probe, storage)
            .with_options(options)
            .evaluate(progress)?;
        log::info!(
            "Run finished: {} ({} changes, {} failed)",
            report.status_label(),
            report.metrics.changes,
            report.metrics.failed
        );
        Ok(report)
    }
}

fn progress_for(ctx: &Context, label: &'static str) -> BarProgress {
    if ctx.quiet {
        BarProgress::hidden()
    } else {
        BarProgress::new(label)
    }
}

/// Apply a catalog file, returning the detailed exit code
///
/// Unless running in noop mode, confirmation is requested after a
/// simulated run has shown what would change.
pub fn apply(ctx: &Context, catalog: &Path, opts: &ApplyOptions) -> Result<i32> {
    let settings = Settings::load()?;
    let probe = SystemProbe::gather(&settings.facts);
    let registry = resource::registry();
    let runner = SystemRunner;
    let host = Host {
        registry: &registry,
        runner: &runner,
        probe: &probe,
    };

    let decls = super::load_decls(catalog)?;
    let options = TransactionOptions {
        noop: opts.noop || settings.noop,
        show_diff: opts.show_diff.unwrap_or(settings.show_diff),
        tags: opts.tags.clone(),
        ..TransactionOptions::default()
    };

    if !options.noop && settings.confirm && !opts.yes {
        let preview_options = TransactionOptions {
            noop: true,
            ..options.clone()
        };
        let preview = host.run(
            decls.clone(),
            &mut MemoryStorage::new(),
            preview_options,
            &mut progress_for(ctx, "Checking"),
        )?;
        display_changes(&preview, "Pending Changes");

        if pending_changes(&preview) == 0 {
            print_summary(&preview);
            return Ok(preview.exit_status());
        }
        if !confirm_proceed()? {
            println!();
            ui::warn("Aborted; no changes made");
            return Ok(0);
        }
    }

    let mut state = StateFile::load(&settings.state_path()?)?;
    match state.last_updated() {
        Some(at) => log::debug!("State file {} last written {at}", state.path().display()),
        None => log::debug!("Starting state file {}", state.path().display()),
    }
    let title = if options.noop { "Noop Run" } else { "Applied Changes" };
    let report = host.run(decls, &mut state, options, &mut progress_for(ctx, "Applying"))?;
    display_changes(&report, title);
    print_summary(&report);

    let destination = match &opts.report {
        Some(path) => Some(path.clone()),
        None => settings.report_dir().map(|dir| dir.join(report_file_name(&report))),
    };
    if let Some(path) = destination {
        write_report(&report, &path)?;
        if !ctx.quiet {
            ui::info(&format!("Report written to {}", path.display()));
        }
    }

    Ok(report.exit_status())
}

/// Simulate a catalog and show what would change; nothing is persisted
pub fn plan(ctx: &Context, catalog: &Path, tags: &[String]) -> Result<i32> {
    let settings = Settings::load()?;
    let probe = SystemProbe::gather(&settings.facts);
    let registry = resource::registry();
    let host = Host {
        registry: &registry,
        runner: &SystemRunner,
        probe: &probe,
    };

    let options = TransactionOptions {
        noop: true,
        show_diff: settings.show_diff,
        tags: tags.to_vec(),
        ..TransactionOptions::default()
    };
    let report = host.run(
        super::load_decls(catalog)?,
        &mut MemoryStorage::new(),
        options,
        &mut progress_for(ctx, "Checking"),
    )?;
    display_changes(&report, "Pending Changes");
    print_summary(&report);
    Ok(report.exit_status())
}

fn report_file_name(report: &Report) -> String {
    format!("report-{}.json", report.started.format("%Y%m%dT%H%M%SZ"))
}

/// Serialize a report as pretty JSON
pub fn write_report(report: &Report, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
    }
    let json = report.to_json().context("Failed to serialize report")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    log::debug!("Wrote report to {}", path.display());
    Ok(())
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Apply these changes?")
        .default(false)
        .interact()?;

    Ok(confirmed)
}
