//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// lifehub - photo library and calendar backed by Google Drive
#[derive(Debug, Parser)]
#[command(name = "lifehub")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "LIFEHUB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(long, short)]
    pub bind: Option<String>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server (the default)
    Serve,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration, secrets masked
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serving() {
        let cli = Cli::try_parse_from(["lifehub"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.debug);
        assert!(cli.bind.is_none());
    }

    #[test]
    fn parses_flags_and_subcommands() {
        let cli = Cli::try_parse_from([
            "lifehub",
            "-v",
            "--json-logs",
            "--bind",
            "0.0.0.0:8080",
            "config",
            "dump",
        ])
        .unwrap();
        assert!(cli.debug);
        assert!(cli.json_logs);
        assert_eq!(cli.bind.as_deref(), Some("0.0.0.0:8080"));
        assert!(matches!(
            cli.command,
            Some(Command::Config {
                action: ConfigAction::Dump
            })
        ));
    }

    #[test]
    fn rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["lifehub", "status"]).is_err());
    }
}
