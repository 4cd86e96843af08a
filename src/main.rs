mod cli;
mod config;
mod engine;
mod facts;
mod manifest;
mod paths;
mod progress;
mod resource;
mod runner;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    log::trace!("verbosity {}", ctx.verbose);

    // Structural errors surface as `Err` and exit with 1
    let code = match cli.command {
        Command::Apply(args) => {
            let opts = engine::ApplyOptions {
                noop: args.noop,
                yes: args.yes,
                show_diff: args.show_diff(),
                report: args.report.clone(),
                tags: args.tags.clone(),
            };
            engine::apply(&ctx, &args.catalog, &opts)?
        }
        Command::Plan { catalog, tags } => engine::executor::plan(&ctx, &catalog, &tags)?,
        Command::Graph { catalog } => {
            engine::inspect::graph(&catalog)?;
            0
        }
        Command::Types => {
            engine::inspect::types()?;
            0
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "marionette", &mut io::stdout());
            0
        }
    };

    if code != 0 {
        if code & 4 != 0 && !ctx.quiet {
            ui::error("Some resources failed; see the messages above");
        }
        std::process::exit(code);
    }
    Ok(())
}
