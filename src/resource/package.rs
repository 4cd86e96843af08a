//! `package` resources: software installed through a package manager
//!
//! `ensure` takes `present` (alias `installed`), `absent`, `latest` or an
//! exact version. Each provider lists installed packages once per
//! transaction through the shared listing cache and drops that listing
//! whenever it installs or removes something.

use anyhow::{Context, Result, bail};
use regex::Regex;
use reconcile::{
    CommandRunner, Listing, PropertySpec, Provider, ProviderContext, ProviderDescriptor, Resource,
    TypeDescriptor, Value,
};
use serde::Deserialize;
use std::sync::LazyLock;

static APT_CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Candidate:\s*(\S+)").expect("apt candidate pattern is valid")
});

pub fn descriptor() -> TypeDescriptor {
    TypeDescriptor::new("package", "name")
        .doc("Packages installed through the platform's package manager")
        .property(
            PropertySpec::ensure()
                .munge(munge_package_ensure)
                .default_value(Value::Present)
                .value_event("present", "package_installed")
                .value_event("absent", "package_removed"),
        )
}

pub fn providers() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor::new("apt", "package", apt)
            .command("apt-get")
            .command("dpkg-query")
            .default_for("os_family", &["debian"]),
        ProviderDescriptor::new("dnf", "package", dnf)
            .command("dnf")
            .command("rpm")
            .default_for("os_family", &["redhat"]),
        ProviderDescriptor::new("brew", "package", brew)
            .command("brew")
            .default_for("kernel", &["darwin"]),
    ]
}

fn apt() -> Box<dyn Provider> {
    Box::new(Managed(Apt))
}

fn dnf() -> Box<dyn Provider> {
    Box::new(Managed(Dnf))
}

fn brew() -> Box<dyn Provider> {
    Box::new(Managed(Brew))
}

fn munge_package_ensure(raw: &Value) -> Result<Value, String> {
    match raw {
        Value::Boolean(true) => Ok(Value::Present),
        Value::Boolean(false) => Ok(Value::Absent),
        Value::Array(_) => Err("ensure takes a single value".to_string()),
        _ => match raw.to_string().trim() {
            "" => Err("ensure cannot be empty".to_string()),
            "present" | "installed" => Ok(Value::Present),
            "absent" => Ok(Value::Absent),
            version => Ok(Value::from(version)),
        },
    }
}

// ============================================================================
// Backends
// ============================================================================

/// Command-level operations of one package manager
trait Backend: std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Installed package names with their versions
    fn list_installed(&self, runner: &dyn CommandRunner) -> Result<Listing>;

    fn install(&self, runner: &dyn CommandRunner, name: &str, version: Option<&str>) -> Result<()>;

    /// Upgrade or install to the newest available version
    fn update(&self, runner: &dyn CommandRunner, name: &str, _installed: bool) -> Result<()> {
        self.install(runner, name, None)
    }

    fn uninstall(&self, runner: &dyn CommandRunner, name: &str) -> Result<()>;

    /// Newest version available from the configured repositories
    fn latest(&self, runner: &dyn CommandRunner, name: &str) -> Result<Option<String>>;
}

fn run_checked(runner: &dyn CommandRunner, cmd: &str, args: &[&str]) -> Result<()> {
    let output = runner.run(cmd, args)?;
    if !output.success {
        bail!(
            "{cmd} {} failed: {}",
            args.join(" "),
            output.stderr_str().trim()
        );
    }
    Ok(())
}

#[derive(Debug)]
struct Apt;

impl Backend for Apt {
    fn name(&self) -> &'static str {
        "apt"
    }

    fn list_installed(&self, runner: &dyn CommandRunner) -> Result<Listing> {
        let output = runner.run_capture(
            "dpkg-query",
            &["-W", "-f", "${Package} ${Version} ${Status}\\n"],
        )?;
        Ok(parse_dpkg_query(&output))
    }

    fn install(&self, runner: &dyn CommandRunner, name: &str, version: Option<&str>) -> Result<()> {
        let target = version.map_or_else(|| name.to_string(), |v| format!("{name}={v}"));
        run_checked(
            runner,
            "apt-get",
            &["-q", "-y", "-o", "DPkg::Options::=--force-confold", "install", &target],
        )
    }

    fn uninstall(&self, runner: &dyn CommandRunner, name: &str) -> Result<()> {
        run_checked(runner, "apt-get", &["-q", "-y", "remove", name])
    }

    fn latest(&self, runner: &dyn CommandRunner, name: &str) -> Result<Option<String>> {
        let output = runner.run_capture("apt-cache", &["policy", name])?;
        Ok(parse_apt_candidate(&output))
    }
}

#[derive(Debug)]
struct Dnf;

impl Backend for Dnf {
    fn name(&self) -> &'static str {
        "dnf"
    }

    fn list_installed(&self, runner: &dyn CommandRunner) -> Result<Listing> {
        let output = runner.run_capture(
            "rpm",
            &["-qa", "--queryformat", "%{NAME} %{VERSION}-%{RELEASE}\\n"],
        )?;
        Ok(parse_name_version_lines(&output))
    }

    fn install(&self, runner: &dyn CommandRunner, name: &str, version: Option<&str>) -> Result<()> {
        let target = version.map_or_else(|| name.to_string(), |v| format!("{name}-{v}"));
        run_checked(runner, "dnf", &["-y", "install", &target])
    }

    fn update(&self, runner: &dyn CommandRunner, name: &str, installed: bool) -> Result<()> {
        // `dnf upgrade` refuses packages that are not installed yet
        let action = if installed { "upgrade" } else { "install" };
        run_checked(runner, "dnf", &["-y", action, name])
    }

    fn uninstall(&self, runner: &dyn CommandRunner, name: &str) -> Result<()> {
        run_checked(runner, "dnf", &["-y", "remove", name])
    }

    fn latest(&self, runner: &dyn CommandRunner, name: &str) -> Result<Option<String>> {
        let output = runner.run_capture(
            "dnf",
            &[
                "-q",
                "repoquery",
                "--latest-limit",
                "1",
                "--queryformat",
                "%{version}-%{release}",
                name,
            ],
        )?;
        Ok(output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(ToString::to_string))
    }
}

#[derive(Debug)]
struct Brew;

impl Backend for Brew {
    fn name(&self) -> &'static str {
        "brew"
    }

    fn list_installed(&self, runner: &dyn CommandRunner) -> Result<Listing> {
        let output = runner.run_capture("brew", &["list", "--versions"])?;
        Ok(parse_brew_versions(&output))
    }

    fn install(&self, runner: &dyn CommandRunner, name: &str, version: Option<&str>) -> Result<()> {
        if let Some(version) = version {
            bail!("brew cannot install {name} at version {version}; use present or latest");
        }
        run_checked(runner, "brew", &["install", name])
    }

    fn update(&self, runner: &dyn CommandRunner, name: &str, installed: bool) -> Result<()> {
        let action = if installed { "upgrade" } else { "install" };
        run_checked(runner, "brew", &[action, name])
    }

    fn uninstall(&self, runner: &dyn CommandRunner, name: &str) -> Result<()> {
        run_checked(runner, "brew", &["uninstall", name])
    }

    fn latest(&self, runner: &dyn CommandRunner, name: &str) -> Result<Option<String>> {
        let output = runner.run_capture("brew", &["info", "--json=v2", name])?;
        parse_brew_info(&output)
    }
}

// ============================================================================
// Output parsing
// ============================================================================

/// `name version status...` lines; only fully installed packages count
fn parse_dpkg_query(output: &str) -> Listing {
    output
        .lines()
        .filter(|line| line.ends_with(" ok installed"))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some((fields.next()?.to_string(), fields.next()?.to_string()))
        })
        .collect()
}

fn parse_name_version_lines(output: &str) -> Listing {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some((fields.next()?.to_string(), fields.next()?.to_string()))
        })
        .collect()
}

/// `name v1 v2` lines; the last listed version is the active one
fn parse_brew_versions(output: &str) -> Listing {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            Some((name.to_string(), fields.last()?.to_string()))
        })
        .collect()
}

fn parse_apt_candidate(output: &str) -> Option<String> {
    let candidate = APT_CANDIDATE.captures(output)?.get(1)?.as_str();
    (candidate != "(none)").then(|| candidate.to_string())
}

#[derive(Debug, Deserialize)]
struct BrewInfo {
    #[serde(default)]
    formulae: Vec<BrewFormula>,
    #[serde(default)]
    casks: Vec<BrewCask>,
}

#[derive(Debug, Deserialize)]
struct BrewFormula {
    versions: BrewVersions,
}

#[derive(Debug, Deserialize)]
struct BrewVersions {
    stable: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BrewCask {
    version: Option<String>,
}

fn parse_brew_info(output: &str) -> Result<Option<String>> {
    let info: BrewInfo = serde_json::from_str(output).context("Failed to parse brew info")?;
    Ok(info
        .formulae
        .into_iter()
        .find_map(|f| f.versions.stable)
        .or_else(|| info.casks.into_iter().find_map(|c| c.version)))
}

// ============================================================================
// Provider
// ============================================================================

#[derive(Debug)]
struct Managed<B: Backend>(B);

impl<B: Backend> Managed<B> {
    fn installed_version(&self, ctx: &mut ProviderContext<'_>, name: &str) -> Result<Option<String>> {
        let backend = &self.0;
        let runner = ctx.runner;
        let listing = ctx.cache.get_or_load(backend.name(), || {
            backend
                .list_installed(runner)
                .with_context(|| format!("Could not list {} packages", backend.name()))
        })?;
        Ok(listing.get(name).cloned())
    }
}

impl<B: Backend> Provider for Managed<B> {
    fn retrieve(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
    ) -> Result<Value> {
        if property != "ensure" {
            bail!("package has no property '{property}'");
        }
        Ok(self
            .installed_version(ctx, &resource.name)?
            .map_or(Value::Absent, Value::from))
    }

    fn sync(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
        should: &Value,
    ) -> Result<Option<String>> {
        if property != "ensure" {
            bail!("package has no property '{property}'");
        }
        let name = &resource.name;
        let was_installed = self.installed_version(ctx, name)?.is_some();
        let backend = &self.0;
        let runner = ctx.runner;

        let result = match should {
            Value::Present => backend.install(runner, name, None),
            Value::Absent => backend.uninstall(runner, name),
            other if other.as_str() == Some("latest") => {
                backend.update(runner, name, was_installed)
            }
            version => backend.install(runner, name, Some(&version.to_string())),
        };
        ctx.cache.invalidate(backend.name());
        result?;

        let event = match should {
            Value::Present | Value::Absent => None,
            _ if was_installed => Some("package_changed".to_string()),
            _ => Some("package_installed".to_string()),
        };
        Ok(event)
    }

    /// `latest` becomes the newest available version, so a package already
    /// at that version is in sync
    fn canonicalize_should(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        _property: &str,
        should: &Value,
    ) -> Value {
        if should.as_str() != Some("latest") {
            return should.clone();
        }
        match self.0.latest(ctx.runner, &resource.name) {
            Ok(Some(version)) => Value::from(version),
            Ok(None) => should.clone(),
            Err(err) => {
                log::warn!("{resource}: Could not get latest version: {err:#}");
                should.clone()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
