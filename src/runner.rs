use anyhow::{Context, Result};
use reconcile::{CommandOutput, CommandRunner};
use std::path::Path;
use std::process::{Command, Stdio};

/// Runs provider commands on this machine, capturing their output
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run_in(&self, cwd: Option<&Path>, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        log::debug!("Executing: {} {}", cmd, args.join(" "));
        let mut command = Command::new(cmd);
        command.args(args).stdin(Stdio::null());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        let output = command
            .output()
            .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;
        Ok(output.into())
    }
}
