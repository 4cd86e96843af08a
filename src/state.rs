use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reconcile::{ResourceRef, Storage, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// State Structures
// ============================================================================

/// On-disk layout of the state file
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
struct StateData {
    /// Last time the state was written
    last_updated: Option<DateTime<Utc>>,

    /// Stored values per resource reference, e.g. `File[/etc/motd]`
    #[serde(default)]
    resources: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Storage backed by a TOML file, written on flush
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    data: StateData,
    dirty: bool,
}

// ============================================================================
// StateFile Implementation
// ============================================================================

impl StateFile {
    /// Load state from `path`, or start empty if the file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read state file: {}", path.display()))?;
            let data: StateData = toml::from_str(&content)
                .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
            log::debug!("Loaded state from {}", path.display());
            data
        } else {
            log::debug!("State file does not exist, using empty state");
            StateData::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            data,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save state to disk
    pub fn save(&mut self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        self.data.last_updated = Some(Utc::now());
        let content =
            toml::to_string_pretty(&self.data).context("Failed to serialize state to TOML")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))?;

        self.dirty = false;
        log::debug!("Saved state to {}", self.path.display());
        Ok(())
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.data.last_updated
    }
}

impl Storage for StateFile {
    fn get(&self, resource: &ResourceRef, key: &str) -> Option<Value> {
        self.data
            .resources
            .get(&resource.to_string())
            .and_then(|values| values.get(key))
            .cloned()
    }

    fn set(&mut self, resource: &ResourceRef, key: &str, value: Value) {
        // TOML has no representation for the absent sentinel beyond its name
        let value = match value {
            Value::Absent | Value::Present => Value::String(value.to_string()),
            other => other,
        };
        self.data
            .resources
            .entry(resource.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.dirty = true;
    }

    fn flush(&mut self) -> Result<()> {
        if self.dirty { self.save() } else { Ok(()) }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let state = StateFile::load(&dir.path().join("state.toml")).unwrap();
        assert!(state.get(&ResourceRef::new("file", "/x"), "mode").is_none());
        assert!(state.last_updated().is_none());
    }

    #[test]
    fn test_values_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.toml");
        let motd = ResourceRef::new("file", "/etc/motd");

        let mut state = StateFile::load(&path).unwrap();
        state.set(&motd, "mode", Value::from("0644"));
        state.set(&motd, "ensure", Value::Absent);
        state.set(&ResourceRef::new("service", "sshd"), "checked", Value::from("now"));
        state.flush().unwrap();

        let state = StateFile::load(&path).unwrap();
        assert_eq!(state.get(&motd, "mode"), Some(Value::from("0644")));
        assert_eq!(state.get(&motd, "ensure"), Some(Value::from("absent")));
        assert!(state.last_updated().is_some());

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[resources.\"File[/etc/motd]\"]"));
    }

    #[test]
    fn test_flush_without_changes_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        let mut state = StateFile::load(&path).unwrap();
        state.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "resources = 3").unwrap();
        let err = StateFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse state file"));
    }
}
