use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "marionette")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Apply a declared catalog of resources to this machine", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring this machine in line with a catalog
    Apply(ApplyArgs),

    /// Show what applying a catalog would change
    Plan {
        /// Catalog file (TOML)
        catalog: PathBuf,

        /// Only evaluate resources with one of these tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Print the relationship graph of a catalog in DOT format
    Graph {
        /// Catalog file (TOML)
        catalog: PathBuf,
    },

    /// List resource types and the providers usable here
    Types,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Catalog file (TOML)
    pub catalog: PathBuf,

    /// Simulate changes without making them
    #[arg(short, long)]
    pub noop: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Write the JSON report to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Show content diffs for pending file changes
    #[arg(long, overrides_with = "no_show_diff")]
    pub show_diff: bool,

    /// Never compute content diffs
    #[arg(long)]
    pub no_show_diff: bool,

    /// Only evaluate resources with one of these tags
    #[arg(short, long, value_delimiter = ',')]
    pub tags: Vec<String>,
}

impl ApplyArgs {
    /// `Some` only when a diff flag was given
    pub fn show_diff(&self) -> Option<bool> {
        match (self.show_diff, self.no_show_diff) {
            (true, _) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply() {
        let cli = Cli::parse_from(["marionette", "-vv", "apply", "site.toml", "--noop", "-y"]);
        assert_eq!(cli.verbose, 2);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.catalog, PathBuf::from("site.toml"));
        assert!(args.noop);
        assert!(args.yes);
        assert_eq!(args.show_diff(), None);
        assert!(args.tags.is_empty());
    }

    #[test]
    fn test_tags_are_comma_delimited() {
        let cli = Cli::parse_from([
            "marionette", "apply", "site.toml", "--tags", "web,db", "-t", "cron",
        ]);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.tags, vec!["web", "db", "cron"]);

        let cli = Cli::parse_from(["marionette", "plan", "site.toml", "-t", "web"]);
        let Command::Plan { tags, .. } = cli.command else {
            panic!("expected plan");
        };
        assert_eq!(tags, vec!["web"]);
    }

    #[test]
    fn test_show_diff_flags() {
        let cli = Cli::parse_from(["marionette", "apply", "site.toml", "--no-show-diff"]);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.show_diff(), Some(false));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
