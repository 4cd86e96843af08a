//! Transaction reports
//!
//! A [`Report`] collects one [`ResourceStatus`] per evaluated resource plus
//! the log lines emitted along the way. It serialises to JSON and maps onto
//! detailed exit codes: 0 nothing changed, 2 changes, 4 failures, 6 both.

use crate::event::Event;
use crate::resource::Resource;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Success,
    Failure,
    Noop,
    Audit,
}

/// One property-level change, attempted or simulated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub resource: String,
    pub property: String,
    /// Current value; `None` when it could not be retrieved
    pub is: Option<Value>,
    pub should: Value,
    pub status: ChangeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Outcome of evaluating a single resource
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceStatus {
    pub resource: String,
    pub type_name: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub changed: bool,
    pub failed: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub out_of_sync_count: usize,
    pub change_count: usize,
    pub restarted: bool,
    pub failed_to_restart: bool,
    pub changes: Vec<Change>,
    pub events: Vec<Event>,
    /// Seconds spent evaluating
    pub evaluation_time: f64,
}

impl ResourceStatus {
    pub fn new(resource: &Resource) -> Self {
        Self {
            resource: resource.to_string(),
            type_name: resource.type_name().to_string(),
            title: resource.title().to_string(),
            ..Self::default()
        }
    }

    pub fn skipped(resource: &Resource, reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            skip_reason: Some(reason.into()),
            ..Self::new(resource)
        }
    }

    /// Whether dependents must be skipped
    pub fn blocks_dependents(&self) -> bool {
        self.failed || self.skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Notice => write!(f, "notice"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "err"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    pub time: DateTime<Utc>,
}

/// Aggregate counters over all resource statuses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub total: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub out_of_sync: usize,
    pub restarted: usize,
    pub failed_to_restart: usize,
    pub changes: usize,
    pub noop_changes: usize,
    pub events: usize,
}

impl Metrics {
    /// Total number of applied changes
    pub fn total_changes(&self) -> usize {
        self.changes
    }

    /// Check if the run was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.failed_to_restart == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub started: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    pub noop: bool,
    pub resource_statuses: Vec<ResourceStatus>,
    pub logs: Vec<LogEntry>,
    pub metrics: Metrics,
    #[serde(skip)]
    warned: HashSet<String>,
}

impl Report {
    pub fn new(noop: bool) -> Self {
        Self {
            started: Utc::now(),
            finished: None,
            noop,
            resource_statuses: Vec::new(),
            logs: Vec::new(),
            metrics: Metrics::default(),
            warned: HashSet::new(),
        }
    }

    /// Record a log line and forward it to the `log` facade
    pub fn log(&mut self, level: LogLevel, source: impl Into<String>, message: impl Into<String>) {
        let source = source.into();
        let message = message.into();
        match level {
            LogLevel::Debug => log::debug!("{source}: {message}"),
            LogLevel::Info | LogLevel::Notice => log::info!("{source}: {message}"),
            LogLevel::Warning => log::warn!("{source}: {message}"),
            LogLevel::Error => log::error!("{source}: {message}"),
        }
        self.logs.push(LogEntry {
            level,
            source,
            message,
            time: Utc::now(),
        });
    }

    /// Log a warning only the first time `key` is seen in this report
    pub fn warn_once(&mut self, key: &str, source: impl Into<String>, message: impl Into<String>) {
        if self.warned.insert(key.to_string()) {
            self.log(LogLevel::Warning, source, message);
        }
    }

    pub fn add_status(&mut self, status: ResourceStatus) {
        self.resource_statuses.push(status);
    }

    pub fn status_for(&self, resource: &str) -> Option<&ResourceStatus> {
        self.resource_statuses.iter().find(|s| s.resource == resource)
    }

    /// Every event emitted, in evaluation order
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.resource_statuses.iter().flat_map(|s| s.events.iter())
    }

    pub fn compute_metrics(&self) -> Metrics {
        let mut metrics = Metrics::default();
        for status in &self.resource_statuses {
            metrics.total += 1;
            metrics.changed += usize::from(status.changed);
            metrics.failed += usize::from(status.failed);
            metrics.skipped += usize::from(status.skipped);
            metrics.out_of_sync += usize::from(status.out_of_sync_count > 0);
            metrics.restarted += usize::from(status.restarted);
            metrics.failed_to_restart += usize::from(status.failed_to_restart);
            metrics.changes += status.change_count;
            metrics.noop_changes += status
                .changes
                .iter()
                .filter(|c| c.status == ChangeStatus::Noop)
                .count();
            metrics.events += status.events.len();
        }
        metrics
    }

    pub fn finalize(&mut self) {
        self.metrics = self.compute_metrics();
        self.finished = Some(Utc::now());
    }

    /// `failed`, `changed` or `unchanged`
    pub fn status_label(&self) -> &'static str {
        if !self.metrics.is_success() {
            "failed"
        } else if self.metrics.changes > 0 || self.metrics.restarted > 0 {
            "changed"
        } else {
            "unchanged"
        }
    }

    /// Detailed exit code: bit 2 for changes, bit 4 for failures
    pub fn exit_status(&self) -> i32 {
        let mut code = 0;
        if self.metrics.changes > 0 || self.metrics.restarted > 0 {
            code |= 2;
        }
        if !self.metrics.is_success() {
            code |= 4;
        }
        code
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
