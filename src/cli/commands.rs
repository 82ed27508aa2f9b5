//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: start the supervisor and all configured instances
//! - discover: print merged settings and working directories

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Warden - supervisor for long-lived CLI assistant subprocesses
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the supervisor and spawn all configured instances
    Run {
        /// Base directory for settings discovery (defaults to the cwd)
        #[arg(short, long)]
        base_dir: Option<PathBuf>,
    },

    /// Run configuration discovery and print the result as JSON
    Discover {
        /// Base directory for settings discovery (defaults to the cwd)
        #[arg(short, long)]
        base_dir: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["warden", "run"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run { base_dir: None })));
        assert!(!cli.is_verbose());
    }

    #[test]
    fn test_parse_run_with_base_dir() {
        let cli = Cli::try_parse_from(["warden", "run", "--base-dir", "/work"]).unwrap();
        match cli.command {
            Some(Commands::Run { base_dir }) => {
                assert_eq!(base_dir, Some(PathBuf::from("/work")));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_discover_verbose() {
        let cli = Cli::try_parse_from(["warden", "-v", "discover"]).unwrap();
        assert!(cli.is_verbose());
        assert!(matches!(cli.command, Some(Commands::Discover { .. })));
    }

    #[test]
    fn test_parse_no_command() {
        let cli = Cli::try_parse_from(["warden"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_global_config_flag() {
        let cli = Cli::try_parse_from(["warden", "run", "--config", "custom.yml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.yml")));
    }
}
