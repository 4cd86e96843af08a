//! Change display for finished and simulated runs

use colored::Colorize;
use reconcile::{ChangeStatus, Report, ResourceStatus};
use std::collections::BTreeMap;

/// Whether a status deserves a line in the change display
fn is_notable(status: &ResourceStatus) -> bool {
    !status.changes.is_empty()
        || status.failed
        || status.skipped
        || status.restarted
        || status.failed_to_restart
}

/// Number of resources with pending or applied changes
pub fn pending_changes(report: &Report) -> usize {
    report
        .resource_statuses
        .iter()
        .filter(|s| {
            s.changes
                .iter()
                .any(|c| matches!(c.status, ChangeStatus::Noop | ChangeStatus::Success))
        })
        .count()
}

fn symbol(status: &ResourceStatus) -> colored::ColoredString {
    if status.failed || status.failed_to_restart {
        "✗".red()
    } else if status.skipped {
        "⊘".dimmed()
    } else {
        "~".yellow()
    }
}

fn change_symbol(change: ChangeStatus) -> colored::ColoredString {
    match change {
        ChangeStatus::Success => "✓".green(),
        ChangeStatus::Failure => "✗".red(),
        ChangeStatus::Noop => "→".cyan(),
        ChangeStatus::Audit => "•".dimmed(),
    }
}

/// Print unified diff lines with the usual colors
fn print_detail(detail: &str) {
    for line in detail.lines() {
        let colored = if line.starts_with("+++") || line.starts_with("---") {
            line.bold()
        } else if line.starts_with('+') {
            line.green()
        } else if line.starts_with('-') {
            line.red()
        } else if line.starts_with("@@") {
            line.cyan()
        } else {
            line.dimmed()
        };
        println!("│       {colored}");
    }
}

/// Display every resource that changed, would change, failed or was skipped
pub fn display_changes(report: &Report, title: &str) {
    let notable: Vec<&ResourceStatus> = report
        .resource_statuses
        .iter()
        .filter(|s| is_notable(s))
        .collect();

    if notable.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    let mut by_type: BTreeMap<&str, Vec<&ResourceStatus>> = BTreeMap::new();
    for status in notable {
        by_type.entry(status.type_name.as_str()).or_default().push(status);
    }

    println!();
    println!("┌─ {} ─────────────────────────────────────────┐", title.bold());
    println!("│");

    for (type_name, statuses) in &by_type {
        println!("│ {}", type_name.bold());
        for status in statuses {
            let provider = status
                .provider
                .as_deref()
                .map(|p| format!(" ({p})").dimmed().to_string())
                .unwrap_or_default();
            println!("│   {} {}{}", symbol(status), status.resource, provider);

            if let Some(reason) = &status.skip_reason {
                println!("│     {}", reason.dimmed());
            }
            for change in &status.changes {
                println!("│     {} {}", change_symbol(change.status), change.message);
                if let Some(detail) = &change.detail {
                    print_detail(detail);
                }
            }
            if status.restarted {
                println!("│     {} {}", "↻".cyan(), "refreshed".dimmed());
            }
            if status.failed_to_restart {
                println!("│     {} {}", "✗".red(), "refresh failed".red());
            }
        }
        println!("│");
    }

    let metrics = &report.metrics;
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} resources, {} changed, {} failed, {} skipped",
        metrics.total.to_string().bold(),
        metrics.changed.to_string().green(),
        metrics.failed.to_string().red(),
        metrics.skipped.to_string().dimmed()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

/// Print the closing summary of a real or simulated run
pub fn print_summary(report: &Report) {
    let metrics = &report.metrics;
    println!();
    match (report.noop, metrics.is_success()) {
        (true, true) => println!(
            "  {} Noop run finished: {} changes pending",
            "ℹ".blue(),
            metrics.noop_changes
        ),
        (false, true) => println!("  {} Catalog applied successfully!", "✓".green().bold()),
        (_, false) => println!("  {} Catalog applied with errors", "⚠".yellow().bold()),
    }

    if metrics.changes > 0 {
        println!("    • {} changes applied", metrics.changes);
    }
    if metrics.restarted > 0 {
        println!("    • {} resources refreshed", metrics.restarted);
    }
    if metrics.skipped > 0 {
        println!("    • {} resources skipped", metrics.skipped);
    }
    if metrics.failed > 0 {
        println!("    • {} {} failed", metrics.failed, "resources".red());
    }
    if metrics.failed_to_restart > 0 {
        println!(
            "    • {} {} failed to refresh",
            metrics.failed_to_restart,
            "resources".red()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{Change, Value};

    fn status(resource: &str, change: Option<ChangeStatus>) -> ResourceStatus {
        ResourceStatus {
            resource: resource.to_string(),
            type_name: "file".to_string(),
            changes: change
                .into_iter()
                .map(|status| Change {
                    resource: resource.to_string(),
                    property: "mode".to_string(),
                    is: Some(Value::from("0600")),
                    should: Value::from("0644"),
                    status,
                    message: "mode changed '0600' to '0644'".to_string(),
                    detail: None,
                })
                .collect(),
            ..ResourceStatus::default()
        }
    }

    #[test]
    fn test_pending_changes_counts_noop_and_applied() {
        let mut report = Report::new(true);
        report.add_status(status("File[/a]", Some(ChangeStatus::Noop)));
        report.add_status(status("File[/b]", Some(ChangeStatus::Success)));
        report.add_status(status("File[/c]", Some(ChangeStatus::Failure)));
        report.add_status(status("File[/d]", None));
        assert_eq!(pending_changes(&report), 2);
    }

    #[test]
    fn test_notable_statuses() {
        assert!(!is_notable(&status("File[/d]", None)));
        assert!(is_notable(&status("File[/a]", Some(ChangeStatus::Noop))));
        let skipped = ResourceStatus {
            skipped: true,
            ..ResourceStatus::default()
        };
        assert!(is_notable(&skipped));
    }
}
