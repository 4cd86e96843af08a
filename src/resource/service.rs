//! `service` resources: long-running daemons
//!
//! Services are refreshable: an event from a subscribed resource restarts
//! them, but only if they are running. Starting a service cancels any
//! restart already queued for it.

use anyhow::{Result, bail};
use reconcile::{
    CommandOutput, Confine, ParamSpec, PropertySpec, Provider, ProviderContext,
    ProviderDescriptor, Resource, TypeDescriptor, Value,
};

use super::munge_bool;

pub fn descriptor() -> TypeDescriptor {
    TypeDescriptor::new("service", "name")
        .doc("Running state and boot-time enablement of system services")
        .property(
            PropertySpec::ensure()
                .munge(munge_service_ensure)
                .value_event("running", "service_started")
                .value_event("stopped", "service_stopped")
                .invalidates_refresh_on("running"),
        )
        .property(PropertySpec::new("enable").munge(munge_bool))
        .parameter(ParamSpec::new("start"))
        .parameter(ParamSpec::new("stop"))
        .parameter(ParamSpec::new("status"))
        .parameter(ParamSpec::new("restart"))
        .parameter(ParamSpec::new("pattern"))
        .refreshable()
}

pub fn providers() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor::new("systemd", "service", systemd)
            .command("systemctl")
            .default_for("kernel", &["linux"])
            .default_for("init_system", &["systemd"]),
        ProviderDescriptor::new("base", "service", base).confine(Confine::Feature("posix")),
    ]
}

fn systemd() -> Box<dyn Provider> {
    Box::new(Systemd)
}

fn base() -> Box<dyn Provider> {
    Box::new(Base)
}

fn munge_service_ensure(raw: &Value) -> Result<Value, String> {
    match raw {
        Value::Boolean(true) => Ok(Value::from("running")),
        Value::Boolean(false) => Ok(Value::from("stopped")),
        _ => match raw.as_str() {
            Some("running" | "true") => Ok(Value::from("running")),
            Some("stopped" | "false") => Ok(Value::from("stopped")),
            _ => Err(format!("'{raw}' is not one of running, stopped")),
        },
    }
}

fn running(is: bool) -> Value {
    Value::from(if is { "running" } else { "stopped" })
}

fn check(output: &CommandOutput, action: &str, resource: &Resource) -> Result<()> {
    if output.success {
        Ok(())
    } else {
        bail!(
            "Could not {action} {resource}: {}",
            output.stderr_str().trim()
        )
    }
}

// ============================================================================
// systemd
// ============================================================================

#[derive(Debug, Default)]
struct Systemd;

impl Systemd {
    fn systemctl(
        ctx: &ProviderContext<'_>,
        resource: &Resource,
        action: &str,
    ) -> Result<CommandOutput> {
        ctx.runner.run("systemctl", &[action, &resource.name])
    }

    fn is_running(ctx: &ProviderContext<'_>, resource: &Resource) -> Result<bool> {
        Ok(Self::systemctl(ctx, resource, "is-active")?.success)
    }

    fn is_enabled(ctx: &ProviderContext<'_>, resource: &Resource) -> Result<bool> {
        Ok(Self::systemctl(ctx, resource, "is-enabled")?.success)
    }

    fn set_enabled(ctx: &ProviderContext<'_>, resource: &Resource, enable: bool) -> Result<()> {
        let action = if enable { "enable" } else { "disable" };
        check(&Self::systemctl(ctx, resource, action)?, action, resource)
    }
}

impl Provider for Systemd {
    fn retrieve(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
    ) -> Result<Value> {
        match property {
            "ensure" => Ok(running(Self::is_running(ctx, resource)?)),
            "enable" => Ok(Value::Boolean(Self::is_enabled(ctx, resource)?)),
            other => bail!("service has no property '{other}'"),
        }
    }

    fn sync(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
        should: &Value,
    ) -> Result<Option<String>> {
        match property {
            "ensure" => {
                let action = if should.as_str() == Some("running") { "start" } else { "stop" };
                check(&Self::systemctl(ctx, resource, action)?, action, resource)?;

                // Enablement rides along with the state change
                if let Some(enable) = resource.should("enable").and_then(Value::as_bool)
                    && Self::is_enabled(ctx, resource)? != enable
                {
                    Self::set_enabled(ctx, resource, enable)?;
                }
            }
            "enable" => {
                let enable = should.as_bool().unwrap_or(false);
                Self::set_enabled(ctx, resource, enable)?;
            }
            other => bail!("service has no property '{other}'"),
        }
        Ok(None)
    }

    fn refresh(&mut self, ctx: &mut ProviderContext<'_>, resource: &Resource) -> Result<()> {
        if !Self::is_running(ctx, resource)? {
            log::debug!("{resource}: Skipping restart; service is not running");
            return Ok(());
        }
        check(&Self::systemctl(ctx, resource, "restart")?, "restart", resource)
    }
}

// ============================================================================
// base: user-supplied commands
// ============================================================================

#[derive(Debug, Default)]
struct Base;

impl Base {
    fn shell(ctx: &ProviderContext<'_>, command: &str) -> Result<CommandOutput> {
        ctx.runner.run("sh", &["-c", command])
    }

    fn is_running(ctx: &ProviderContext<'_>, resource: &Resource) -> Result<bool> {
        if let Some(status) = resource.param_str("status") {
            return Ok(Self::shell(ctx, &status)?.success);
        }
        let output = match resource.param_str("pattern") {
            Some(pattern) => ctx.runner.run("pgrep", &["-f", &pattern])?,
            None => ctx.runner.run("pgrep", &["-x", &resource.name])?,
        };
        Ok(output.success)
    }

    fn start(ctx: &ProviderContext<'_>, resource: &Resource) -> Result<()> {
        let Some(start) = resource.param_str("start") else {
            bail!("Services must specify a start command when using the base provider");
        };
        check(&Self::shell(ctx, &start)?, "start", resource)
    }

    fn stop(ctx: &ProviderContext<'_>, resource: &Resource) -> Result<()> {
        let output = match resource.param_str("stop") {
            Some(stop) => Self::shell(ctx, &stop)?,
            None => match resource.param_str("pattern") {
                Some(pattern) => ctx.runner.run("pkill", &["-f", &pattern])?,
                None => ctx.runner.run("pkill", &["-x", &resource.name])?,
            },
        };
        check(&output, "stop", resource)
    }
}

impl Provider for Base {
    fn retrieve(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
    ) -> Result<Value> {
        match property {
            "ensure" => Ok(running(Self::is_running(ctx, resource)?)),
            "enable" => bail!("Provider base does not support managing 'enable'"),
            other => bail!("service has no property '{other}'"),
        }
    }

    fn sync(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
        should: &Value,
    ) -> Result<Option<String>> {
        match (property, should.as_str()) {
            ("ensure", Some("running")) => Self::start(ctx, resource)?,
            ("ensure", _) => Self::stop(ctx, resource)?,
            (other, _) => bail!("Provider base cannot manage '{other}'"),
        }
        Ok(None)
    }

    fn refresh(&mut self, ctx: &mut ProviderContext<'_>, resource: &Resource) -> Result<()> {
        if !Self::is_running(ctx, resource)? {
            log::debug!("{resource}: Skipping restart; service is not running");
            return Ok(());
        }
        match resource.param_str("restart") {
            Some(restart) => check(&Self::shell(ctx, &restart)?, "restart", resource),
            None => {
                Self::stop(ctx, resource)?;
                Self::start(ctx, resource)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{registry, testing::RecordingRunner};
    use reconcile::{
        Catalog, MemoryStorage, NoProgress, Report, ResourceDecl, StaticProbe, Transaction,
    };
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn systemd_host() -> StaticProbe {
        StaticProbe::new()
            .with_fact("kernel", "Linux")
            .with_fact("init_system", "systemd")
            .with_executable("systemctl")
            .with_feature("posix")
    }

    fn apply(decls: Vec<ResourceDecl>, runner: &RecordingRunner, probe: &StaticProbe) -> Report {
        let registry = registry();
        let catalog = Catalog::from_decls(&registry, decls).unwrap();
        let mut storage = MemoryStorage::new();
        Transaction::new(catalog, &registry, runner, probe, &mut storage)
            .evaluate(&mut NoProgress)
            .unwrap()
    }

    #[test]
    fn test_munge_ensure() {
        assert_eq!(munge_service_ensure(&Value::Boolean(true)), Ok(Value::from("running")));
        assert_eq!(munge_service_ensure(&Value::from("stopped")), Ok(Value::from("stopped")));
        assert!(munge_service_ensure(&Value::from("paused")).is_err());
    }

    #[test]
    fn test_systemd_is_default_on_systemd_linux() {
        let runner = RecordingRunner::new().respond("systemctl is-active", 0, "active\n");
        let report = apply(
            vec![ResourceDecl::new("service", "sshd").with("ensure", "running")],
            &runner,
            &systemd_host(),
        );
        assert_eq!(report.exit_status(), 0);
        assert_eq!(report.resource_statuses[0].provider.as_deref(), Some("systemd"));
        assert_eq!(runner.calls(), vec!["systemctl is-active sshd"]);
    }

    #[test]
    fn test_start_also_enables() {
        let runner = RecordingRunner::new()
            .respond("systemctl is-active", 3, "inactive\n")
            .respond("systemctl is-enabled", 1, "disabled\n");
        let report = apply(
            vec![
                ResourceDecl::new("service", "nginx")
                    .with("ensure", "running")
                    .with("enable", true),
            ],
            &runner,
            &systemd_host(),
        );

        assert_eq!(report.exit_status(), 2);
        assert_eq!(runner.calls_to("systemctl start"), vec!["systemctl start nginx"]);
        assert_eq!(runner.calls_to("systemctl enable"), vec!["systemctl enable nginx"]);
        let status = &report.resource_statuses[0];
        assert_eq!(status.events.len(), 1);
        assert_eq!(status.events[0].name, "service_started");
    }

    #[test]
    fn test_failed_start_is_reported() {
        let runner = RecordingRunner::new()
            .respond("systemctl is-active", 3, "")
            .respond("systemctl start", 1, "");
        let report = apply(
            vec![ResourceDecl::new("service", "nginx").with("ensure", "running")],
            &runner,
            &systemd_host(),
        );
        assert_eq!(report.exit_status(), 4);
        let change = &report.resource_statuses[0].changes[0];
        assert_eq!(
            change.message,
            "Service[nginx]: could not change 'ensure' from 'stopped' to 'running': \
             Could not start Service[nginx]: systemctl start failed"
        );
    }

    #[test]
    fn test_subscribed_file_change_restarts_service() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("sshd_config");
        fs::write(&config, "Port 22\n").unwrap();
        let config = config.display().to_string();

        let runner = RecordingRunner::new()
            .respond("systemctl is-active", 0, "active\n")
            .respond("systemctl is-enabled", 0, "enabled\n");
        let report = apply(
            vec![
                ResourceDecl::new("file", &config).with("content", "Port 2222\n"),
                ResourceDecl::new("service", "sshd")
                    .with("ensure", "running")
                    .with("enable", true)
                    .with("subscribe", format!("File[{config}]")),
            ],
            &runner,
            &systemd_host(),
        );

        assert_eq!(report.exit_status(), 2);
        assert_eq!(runner.calls_to("systemctl restart"), vec!["systemctl restart sshd"]);
        let sshd = report.status_for("Service[sshd]").unwrap();
        assert!(sshd.restarted);
        assert!(sshd.events.iter().any(|e| e.name == "restarted"));
    }

    #[test]
    fn test_change_below_recursing_directory_restarts_service() {
        let dir = TempDir::new().unwrap();
        let conf_d = dir.path().join("conf.d");
        fs::create_dir(&conf_d).unwrap();
        fs::set_permissions(&conf_d, fs::Permissions::from_mode(0o755)).unwrap();
        let site = conf_d.join("site.conf");
        fs::write(&site, "listen 80\n").unwrap();
        fs::set_permissions(&site, fs::Permissions::from_mode(0o600)).unwrap();

        let runner = RecordingRunner::new().respond("systemctl is-active", 0, "active\n");
        let report = apply(
            vec![
                ResourceDecl::new("file", conf_d.display().to_string())
                    .with("ensure", "directory")
                    .with("recurse", true)
                    .with("mode", "0644")
                    .with("notify", "Service[app]"),
                ResourceDecl::new("service", "app").with("ensure", "running"),
            ],
            &runner,
            &systemd_host(),
        );

        assert_eq!(report.exit_status(), 2);
        assert_eq!(fs::metadata(&site).unwrap().permissions().mode() & 0o777, 0o644);
        assert_eq!(runner.calls_to("systemctl restart"), vec!["systemctl restart app"]);
        assert!(report.status_for("Service[app]").unwrap().restarted);
    }

    #[test]
    fn test_starting_cancels_queued_restart() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("app.conf");
        let config = config.display().to_string();

        let runner = RecordingRunner::new()
            .respond("systemctl is-active", 3, "inactive\n");
        let report = apply(
            vec![
                ResourceDecl::new("file", &config).with("ensure", "file"),
                ResourceDecl::new("service", "app")
                    .with("ensure", "running")
                    .with("subscribe", format!("File[{config}]")),
            ],
            &runner,
            &systemd_host(),
        );

        assert_eq!(report.exit_status(), 2);
        assert_eq!(runner.calls_to("systemctl start"), vec!["systemctl start app"]);
        assert!(runner.calls_to("systemctl restart").is_empty());
        assert!(!report.status_for("Service[app]").unwrap().restarted);
    }

    #[test]
    fn test_refresh_skips_stopped_service() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("app.conf").display().to_string();

        let runner = RecordingRunner::new().respond("systemctl is-active", 3, "");
        apply(
            vec![
                ResourceDecl::new("file", &config).with("ensure", "file"),
                ResourceDecl::new("service", "app").with("subscribe", format!("File[{config}]")),
            ],
            &runner,
            &systemd_host(),
        );
        assert!(runner.calls_to("systemctl restart").is_empty());
    }

    #[test]
    fn test_base_provider_uses_commands() {
        let probe = StaticProbe::new().with_feature("posix");
        let runner = RecordingRunner::new().respond("sh -c /opt/app/status", 1, "");
        let report = apply(
            vec![
                ResourceDecl::new("service", "app")
                    .with("ensure", "running")
                    .with("start", "/opt/app/start")
                    .with("status", "/opt/app/status"),
            ],
            &runner,
            &probe,
        );

        assert_eq!(report.exit_status(), 2);
        assert_eq!(report.resource_statuses[0].provider.as_deref(), Some("base"));
        assert_eq!(runner.calls_to("sh -c /opt/app/start"), vec!["sh -c /opt/app/start"]);
    }

    #[test]
    fn test_base_provider_cannot_enable() {
        let probe = StaticProbe::new().with_feature("posix");
        let runner = RecordingRunner::new().respond("pgrep", 0, "42\n");
        let report = apply(
            vec![ResourceDecl::new("service", "app").with("enable", true)],
            &runner,
            &probe,
        );
        assert_eq!(report.exit_status(), 4);
        assert!(
            report.resource_statuses[0].changes[0]
                .message
                .contains("does not support managing 'enable'")
        );
        assert!(runner.calls().is_empty());
    }
}
