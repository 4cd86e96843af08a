//! Settings file (`config.toml` in the config directory)
//!
//! Every key is optional. Command-line flags override what is set here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Simulate every run unless overridden on the command line
    pub noop: bool,
    /// Compute content diffs for pending file changes
    pub show_diff: bool,
    /// Where audited values and check times are kept
    pub state_file: Option<String>,
    /// Directory receiving a JSON report after every run
    pub report_dir: Option<String>,
    /// Ask before applying changes
    pub confirm: bool,
    /// Fact overrides, e.g. `os_family = "debian"`
    pub facts: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            noop: false,
            show_diff: true,
            state_file: None,
            report_dir: None,
            confirm: true,
            facts: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load `config.toml`, or defaults if it does not exist
    pub fn load() -> Result<Self> {
        let path = paths::config_dir()?.join("config.toml");
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let settings = toml::from_str(&content)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_file {
            Some(path) => Ok(paths::expand(path)),
            None => Ok(paths::state_dir()?.join("state.toml")),
        }
    }

    pub fn report_dir(&self) -> Option<PathBuf> {
        self.report_dir.as_deref().map(paths::expand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(!settings.noop);
        assert!(settings.confirm);
        assert!(settings.facts.is_empty());
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
noop = true
state_file = "/var/lib/marionette/state.toml"

[facts]
os_family = "debian"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert!(settings.noop);
        assert!(settings.show_diff);
        assert_eq!(
            settings.state_path().unwrap(),
            PathBuf::from("/var/lib/marionette/state.toml")
        );
        assert_eq!(settings.facts["os_family"], "debian");
        assert!(settings.report_dir().is_none());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "noop = 'sometimes'").unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid settings"));
    }
}
