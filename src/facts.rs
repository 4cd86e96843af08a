//! Facts about this machine, used to pick providers
//!
//! Facts gathered here:
//! - `kernel` - `Linux`, `Darwin`, `FreeBSD`, `windows`
//! - `operatingsystem` - `ID` from /etc/os-release (e.g. `ubuntu`)
//! - `os_family` - `debian`, `redhat`, `suse`, `arch` or `darwin`
//! - `init_system` - `systemd` when systemd is PID 1
//!
//! Settings may override any of them.

use reconcile::Probe;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct SystemProbe {
    facts: BTreeMap<String, String>,
}

impl SystemProbe {
    pub fn gather(overrides: &BTreeMap<String, String>) -> Self {
        let mut facts = BTreeMap::new();
        facts.insert("kernel".to_string(), kernel().to_string());

        if let Ok(content) = fs::read_to_string("/etc/os-release") {
            let release = parse_os_release(&content);
            if let Some(id) = release.get("ID") {
                facts.insert("operatingsystem".to_string(), id.clone());
            }
            if let Some(family) = os_family(&release) {
                facts.insert("os_family".to_string(), family.to_string());
            }
        } else if cfg!(target_os = "macos") {
            facts.insert("operatingsystem".to_string(), "darwin".to_string());
            facts.insert("os_family".to_string(), "darwin".to_string());
        }

        if Path::new("/run/systemd/system").is_dir() {
            facts.insert("init_system".to_string(), "systemd".to_string());
        }

        for (name, value) in overrides {
            log::debug!("Fact override: {name} = {value}");
            facts.insert(name.clone(), value.clone());
        }
        Self { facts }
    }

    pub fn facts(&self) -> &BTreeMap<String, String> {
        &self.facts
    }
}

impl Probe for SystemProbe {
    fn fact(&self, name: &str) -> Option<String> {
        self.facts.get(name).cloned()
    }

    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        find_in_path(name, env::var_os("PATH")?.as_os_str())
    }

    fn has_feature(&self, feature: &str) -> bool {
        match feature {
            "posix" => cfg!(unix),
            _ => false,
        }
    }
}

fn kernel() -> &'static str {
    match env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        "freebsd" => "FreeBSD",
        other => other,
    }
}

/// Parse `KEY=value` lines, stripping optional quotes
pub fn parse_os_release(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

/// Family from `ID` and `ID_LIKE`, most specific first
pub fn os_family(release: &BTreeMap<String, String>) -> Option<&'static str> {
    let mut ids: Vec<&str> = Vec::new();
    if let Some(id) = release.get("ID") {
        ids.push(id);
    }
    if let Some(like) = release.get("ID_LIKE") {
        ids.extend(like.split_whitespace());
    }
    ids.into_iter().find_map(|id| match id {
        "debian" | "ubuntu" => Some("debian"),
        "rhel" | "fedora" | "centos" | "rocky" | "almalinux" => Some("redhat"),
        "suse" | "opensuse" | "sles" => Some("suse"),
        "arch" => Some("arch"),
        _ => None,
    })
}

fn find_in_path(name: &str, path: &std::ffi::OsStr) -> Option<PathBuf> {
    if name.contains('/') {
        let candidate = PathBuf::from(name);
        return candidate.is_file().then_some(candidate);
    }
    env::split_paths(path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
