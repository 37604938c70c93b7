//! Configuration commands.

use std::path::Path;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Dump the current configuration to stdout, secrets masked.
pub fn dump(config: &ServerConfig, path: &Path) -> ServerResult<()> {
    let toml_str = toml::to_string_pretty(&config.redacted())
        .map_err(|e| ServerError::config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", path.display());
    println!("{}", toml_str);
    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &ServerConfig) -> ServerResult<()> {
    config.validate().map_err(ServerError::config)?;
    if config.folder_id().is_none() {
        println!("warning: no Drive folder configured, photo uploads and import are disabled");
    }
    if config.gemini.api_key.is_none() {
        println!("note: no Gemini API key, uploads will not be labelled");
    }
    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path(path: &Path) -> ServerResult<()> {
    println!("config: {}", path.display());
    println!("data: {}", ServerConfig::default_data_dir().display());
    Ok(())
}
