//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Minimal mutual-TLS HTTPS server
#[derive(Parser, Debug)]
#[command(name = "mtls-gate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MTLS_GATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MTLS_GATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MTLS_GATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MTLS_GATE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MTLS_GATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the mTLS server (default)
    Serve,

    /// Ensure key, certificate and CA exist, generating the server pair if needed
    Bootstrap,

    /// Print subject, issuer and validity of the configured certificate files
    Inspect,
}
