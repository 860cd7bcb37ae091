//! CLI definitions for cellsync.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// cellsync CLI.
#[derive(Parser)]
#[command(name = "cellsync")]
#[command(about = "Collaborative notebook sync engine with ephemeral compute kernels")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config/cellsync.toml",
        env = "CELLSYNC_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the server in foreground (default)
    Serve {
        /// Server host, overriding `server.host`
        #[arg(long)]
        host: Option<String>,

        /// Server port, overriding `server.port`
        #[arg(long)]
        port: Option<u16>,
    },

    /// Load and validate the configuration
    CheckConfig,
}
