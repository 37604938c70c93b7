//! lifehub entry point.

use std::process::ExitCode;

use clap::Parser;
use lifehub_core::{TracingConfig, init_tracing};

use lifehub_server::cli::{Cli, Command, ConfigAction};
use lifehub_server::commands;
use lifehub_server::config::ServerConfig;
use lifehub_server::error::{ServerError, ServerResult};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(TracingConfig::from_flags(cli.debug, cli.json_logs)) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ServerResult<()> {
    let config_path = cli.config.clone().unwrap_or_else(ServerConfig::default_path);
    let mut config = if cli.config.is_some() {
        ServerConfig::load_from(&config_path).map_err(ServerError::config)?
    } else {
        ServerConfig::load().map_err(ServerError::config)?
    }
    .apply_env();
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    match cli.command {
        None | Some(Command::Serve) => commands::serve::run(config).await,
        Some(Command::Config { action }) => match action {
            ConfigAction::Dump => commands::config::dump(&config, &config_path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config_path),
        },
    }
}
