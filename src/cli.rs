//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Request-time access control: open, basic and proxy-terminated mTLS
#[derive(Parser, Debug)]
#[command(name = "provider-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "PROVIDER_AUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PROVIDER_AUTH_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "PROVIDER_AUTH_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "PROVIDER_AUTH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "PROVIDER_AUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default)
    Serve,

    /// Load and validate the configuration, then print the active strategies
    CheckConfig,

    /// Validate a PEM certificate against the configured CA chain
    VerifyCert {
        /// Path to the PEM certificate
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Print the digest to configure for a Basic password
    HashPassword {
        /// The password
        #[arg(required = true)]
        password: String,
    },
}
