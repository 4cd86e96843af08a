//! Provider context and injectable system seams
//!
//! These traits let the reconcile crate run providers without depending on
//! a specific way of spawning commands, gathering facts or reporting
//! progress. The binary supplies real implementations; tests supply fakes.

use crate::report::ResourceStatus;
use crate::resource::ResourceRef;
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Output;

/// Output from a command run on behalf of a provider
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
    pub status: Option<i32>,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
            status: output.status.code(),
        }
    }
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Runs external commands for providers
pub trait CommandRunner {
    /// Run a command, optionally in a working directory
    fn run_in(&self, cwd: Option<&Path>, cmd: &str, args: &[&str]) -> Result<CommandOutput>;

    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        self.run_in(None, cmd, args)
    }

    /// Run a command and return just success/failure
    fn run_status(&self, cmd: &str, args: &[&str]) -> Result<bool> {
        Ok(self.run(cmd, args)?.success)
    }

    /// Run a command and capture stdout
    fn run_capture(&self, cmd: &str, args: &[&str]) -> Result<String> {
        let output = self.run(cmd, args)?;
        if !output.success {
            anyhow::bail!(
                "{cmd} {} failed: {}",
                args.join(" "),
                output.stderr_str().trim()
            );
        }
        Ok(output.stdout_str())
    }
}

/// Read-only view of the host used for provider confinement
pub trait Probe {
    /// Value of a named fact, e.g. `kernel` or `os_family`
    fn fact(&self, name: &str) -> Option<String>;

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Locate an executable on the search path
    fn find_executable(&self, name: &str) -> Option<PathBuf>;

    fn has_feature(&self, _feature: &str) -> bool {
        false
    }
}

/// A probe backed by fixed data
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    pub facts: HashMap<String, String>,
    pub executables: Vec<String>,
    pub paths: Vec<PathBuf>,
    pub features: Vec<String>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fact(mut self, name: &str, value: &str) -> Self {
        self.facts.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_executable(mut self, name: &str) -> Self {
        self.executables.push(name.to_string());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn with_feature(mut self, feature: &str) -> Self {
        self.features.push(feature.to_string());
        self
    }
}

impl Probe for StaticProbe {
    fn fact(&self, name: &str) -> Option<String> {
        self.facts.get(name).cloned()
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        self.executables
            .iter()
            .any(|e| e == name)
            .then(|| PathBuf::from("/usr/bin").join(name))
    }

    fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// Listing keyed by item name, e.g. installed package to version
pub type Listing = BTreeMap<String, String>;

const MAX_LISTINGS: usize = 64;

/// Per-transaction cache of expensive system listings
///
/// Providers share it by key (normally their own name). It is cleared at
/// the start and end of every transaction and providers invalidate their
/// entry after mutating the system.
#[derive(Debug, Default)]
pub struct ListingCache {
    listings: HashMap<String, Listing>,
    loads: usize,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(
        &mut self,
        key: &str,
        load: impl FnOnce() -> Result<Listing>,
    ) -> Result<&Listing> {
        if !self.listings.contains_key(key) {
            if self.listings.len() >= MAX_LISTINGS {
                log::debug!("listing cache full, clearing");
                self.listings.clear();
            }
            let listing = load()?;
            self.loads += 1;
            self.listings.insert(key.to_string(), listing);
        }
        self.listings
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("listing '{key}' vanished from cache"))
    }

    pub fn invalidate(&mut self, key: &str) {
        self.listings.remove(key);
    }

    pub fn clear(&mut self) {
        self.listings.clear();
    }

    /// Number of loader invocations since creation
    pub fn loads(&self) -> usize {
        self.loads
    }
}

/// Everything a provider may touch while retrieving or syncing
pub struct ProviderContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub probe: &'a dyn Probe,
    pub cache: &'a mut ListingCache,
    /// Changes are being simulated
    pub noop: bool,
    /// Providers may compute content diffs for reporting
    pub show_diff: bool,
}

/// Progress callback for transaction evaluation
///
/// Implement this trait to receive progress updates during a run.
pub trait ProgressCallback {
    /// Called once the evaluation order is known
    fn on_start(&mut self, total: usize);

    /// Called when starting to evaluate a single resource
    fn on_resource_start(&mut self, resource: &ResourceRef);

    /// Called when a resource has been evaluated, skipped or failed
    fn on_resource_complete(&mut self, resource: &ResourceRef, status: &ResourceStatus);

    /// Called when the walk is over
    fn on_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&mut self, _total: usize) {}
    fn on_resource_start(&mut self, _resource: &ResourceRef) {}
    fn on_resource_complete(&mut self, _resource: &ResourceRef, _status: &ResourceStatus) {}
    fn on_complete(&mut self) {}
}
