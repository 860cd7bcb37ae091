//! cellsync - collaborative notebook sync engine
//!
//! Main entry point for the cellsync CLI and server.

mod cli;
mod server;

use clap::Parser;

use cellsync_config::{ConfigLoader, ConfigValidator};

use crate::cli::{Cli, Commands};
use crate::server::{init_tracing, run_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = ConfigLoader::load_or_default(&cli.config)?;

    match cli.command {
        Some(Commands::CheckConfig) => check_config(&cli.config, &config),
        Some(Commands::Serve { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            init_tracing(&config.logging)?;
            run_server(config).await
        }
        None => {
            init_tracing(&config.logging)?;
            run_server(config).await
        }
    }
}

/// Print validation errors and warnings; fail when there are errors.
fn check_config(
    path: &std::path::Path,
    config: &cellsync_config::Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = ConfigValidator::validate(config)?;
    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error: {}: {}", error.path, error.message);
    }

    if result.is_valid() {
        println!("{} is valid", path.display());
        Ok(())
    } else {
        Err(format!("{} has {} error(s)", path.display(), result.errors.len()).into())
    }
}
