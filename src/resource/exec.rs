//! `exec` resources: arbitrary shell commands
//!
//! An exec has a single property, `returns`. Retrieval runs the guards
//! (`creates`, `onlyif`, `unless`, `refreshonly`) and reports `notrun` when
//! the command is due, which puts `returns` out of sync and makes the sync
//! run it.

use anyhow::{Result, bail};
use reconcile::{
    CommandOutput, Comparison, Confine, ParamSpec, PropertySpec, Provider, ProviderContext,
    ProviderDescriptor, Resource, ResourceRef, TypeDescriptor, Value,
};
use std::path::Path;
use std::time::Duration;

use super::munge_bool;

const NOT_RUN: &str = "notrun";

pub fn descriptor() -> TypeDescriptor {
    TypeDescriptor::new("exec", "command")
        .doc("Shell commands run when their guards allow it or when refreshed")
        .property(
            PropertySpec::new("returns")
                .compare(Comparison::AnyOf)
                .munge(munge_returns)
                .default_value(0_i64)
                .event("executed_command")
                .describe_with(|_, _| "executed successfully".to_string()),
        )
        .parameter(ParamSpec::new("creates"))
        .parameter(ParamSpec::new("onlyif"))
        .parameter(ParamSpec::new("unless"))
        .parameter(
            ParamSpec::new("refreshonly")
                .munge(munge_bool)
                .default_value(false),
        )
        .parameter(ParamSpec::new("cwd"))
        .parameter(ParamSpec::new("refresh"))
        .parameter(ParamSpec::new("tries").munge(munge_count).default_value(1_i64))
        .parameter(ParamSpec::new("try_sleep").munge(munge_count).default_value(0_i64))
        .parameter(
            ParamSpec::new("logoutput")
                .munge(munge_logoutput)
                .default_value("on_failure"),
        )
        .autorequire(required_files)
        .refreshable()
}

pub fn providers() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor::new("posix", "exec", posix)
            .confine(Confine::Feature("posix"))
            .command("sh"),
    ]
}

fn posix() -> Box<dyn Provider> {
    Box::new(Shell)
}

fn munge_returns(raw: &Value) -> Result<Value, String> {
    let codes = raw
        .items()
        .into_iter()
        .map(|item| {
            item.to_string()
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| format!("'{item}' is not an exit code"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match <[Value; 1]>::try_from(codes) {
        Ok([code]) => code,
        Err(codes) => Value::Array(codes),
    })
}

fn munge_count(raw: &Value) -> Result<Value, String> {
    match raw.to_string().trim().parse::<i64>() {
        Ok(n) if n >= 0 => Ok(Value::Integer(n)),
        _ => Err(format!("'{raw}' is not a non-negative integer")),
    }
}

fn munge_logoutput(raw: &Value) -> Result<Value, String> {
    match raw.as_bool() {
        Some(flag) => Ok(Value::Boolean(flag)),
        None if raw.as_str() == Some("on_failure") => Ok(Value::from("on_failure")),
        None => Err(format!("'{raw}' is not one of true, false, on_failure")),
    }
}

/// `cwd` and any fully qualified executable the command starts with
fn required_files(resource: &Resource) -> Vec<ResourceRef> {
    let mut paths = Vec::new();
    if let Some(cwd) = resource.param_str("cwd") {
        paths.push(cwd);
    }
    let command = resource.name.trim_start();
    let quoted = command
        .strip_prefix('"')
        .and_then(|rest| rest.split_once('"'))
        .map(|(path, _)| path);
    let leading = quoted.or_else(|| command.split_whitespace().next());
    if let Some(executable) = leading.filter(|p| p.starts_with('/')) {
        paths.push(executable.to_string());
    }
    paths
        .into_iter()
        .map(|path| ResourceRef::new("file", path))
        .collect()
}

#[derive(Debug, Default)]
struct Shell;

impl Shell {
    fn run(ctx: &ProviderContext<'_>, resource: &Resource, command: &str) -> Result<CommandOutput> {
        let cwd = resource.param_str("cwd");
        ctx.runner
            .run_in(cwd.as_deref().map(Path::new), "sh", &["-c", command])
    }

    /// Whether every guard allows the command to run
    ///
    /// `refreshonly` is ignored while refreshing.
    fn due(ctx: &ProviderContext<'_>, resource: &Resource, refreshing: bool) -> Result<bool> {
        if !refreshing && resource.param_bool("refreshonly") {
            return Ok(false);
        }

        let strings = |name| resource.param(name).map(Value::strings).unwrap_or_default();

        for path in strings("creates") {
            log::debug!("{resource}: Checking that 'creates' path '{path}' exists");
            if ctx.probe.path_exists(Path::new(&path)) {
                return Ok(false);
            }
        }
        for check in strings("onlyif") {
            let output = Self::run(ctx, resource, &check)?;
            log_lines(resource, &output, log::Level::Debug);
            if !output.success {
                log::debug!("{resource}: Skipping; onlyif '{check}' failed");
                return Ok(false);
            }
        }
        for check in strings("unless") {
            let output = Self::run(ctx, resource, &check)?;
            log_lines(resource, &output, log::Level::Debug);
            if output.success {
                log::debug!("{resource}: Skipping; unless '{check}' succeeded");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run the command up to `tries` times until it exits with an accepted code
    fn execute(ctx: &ProviderContext<'_>, resource: &Resource, command: &str, accepted: &Value) -> Result<()> {
        let tries = resource.param("tries").and_then(Value::as_i64).unwrap_or(1).max(1);
        let sleep = resource.param("try_sleep").and_then(Value::as_i64).unwrap_or(0);
        let accepts = |code: Option<i32>| {
            code.is_some_and(|code| {
                accepted
                    .items()
                    .into_iter()
                    .any(|ok| ok.loosely_eq(&Value::Integer(code.into())))
            })
        };

        let mut output = Self::run(ctx, resource, command)?;
        for attempt in 2..=tries {
            if accepts(output.status) {
                break;
            }
            if sleep > 0 {
                log::debug!("{resource}: Sleeping for {sleep} seconds between tries");
                std::thread::sleep(Duration::from_secs(sleep.unsigned_abs()));
            }
            log::debug!("{resource}: Exec try {attempt}/{tries}");
            output = Self::run(ctx, resource, command)?;
        }

        let ok = accepts(output.status);
        match resource.param("logoutput") {
            Some(Value::Boolean(true)) => log_lines(resource, &output, log::Level::Info),
            Some(Value::Boolean(false)) => {}
            _ if !ok => log_lines(resource, &output, log::Level::Error),
            _ => {}
        }

        if !ok {
            let status = output
                .status
                .map_or_else(|| "a signal".to_string(), |code| code.to_string());
            bail!(
                "'{command}' returned {status} instead of one of [{}]",
                accepted.strings().join(",")
            );
        }
        Ok(())
    }
}

fn log_lines(resource: &Resource, output: &CommandOutput, level: log::Level) {
    for line in output.stdout_str().lines().chain(output.stderr_str().lines()) {
        log::log!(level, "{resource}: {line}");
    }
}

impl Provider for Shell {
    fn retrieve(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
    ) -> Result<Value> {
        if property != "returns" {
            bail!("exec has no property '{property}'");
        }
        if Self::due(ctx, resource, false)? {
            return Ok(Value::from(NOT_RUN));
        }
        Ok(resource
            .should("returns")
            .and_then(|should| should.items().first().map(|v| (*v).clone()))
            .unwrap_or(Value::Integer(0)))
    }

    fn sync(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
        should: &Value,
    ) -> Result<Option<String>> {
        if property != "returns" {
            bail!("exec has no property '{property}'");
        }
        Self::execute(ctx, resource, &resource.name, should)?;
        Ok(None)
    }

    fn refresh(&mut self, ctx: &mut ProviderContext<'_>, resource: &Resource) -> Result<()> {
        if !Self::due(ctx, resource, true)? {
            return Ok(());
        }
        let accepted = resource
            .should("returns")
            .cloned()
            .unwrap_or(Value::Integer(0));
        match resource.param_str("refresh") {
            Some(refresh) => Self::execute(ctx, resource, &refresh, &Value::Integer(0)),
            None => Self::execute(ctx, resource, &resource.name, &accepted),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
