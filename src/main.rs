//! mtls-gate - minimal mutual-TLS HTTPS server

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mtls_gate::{
    cli::{Cli, Command},
    config::Config,
    inspect::inspect,
    mtls::{CertificateBundle, MtlsGate, bootstrap, generator_for},
    server::MtlsServer,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    match cli.command {
        Some(Command::Bootstrap) => run_bootstrap(&config),
        Some(Command::Inspect) => run_inspect(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return None;
        }
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return None;
    }
    Some(config)
}

fn bootstrap_certificates(config: &Config) -> Option<CertificateBundle> {
    let generated = generator_for(&config.bootstrap)
        .and_then(|generator| bootstrap(&config.tls, &config.bootstrap, generator.as_ref()));
    match generated {
        Ok(bundle) => Some(bundle),
        Err(e) => {
            error!("Certificate bootstrap failed: {e}");
            None
        }
    }
}

/// Run bootstrap only
fn run_bootstrap(config: &Config) -> ExitCode {
    let Some(bundle) = bootstrap_certificates(config) else {
        return ExitCode::FAILURE;
    };

    if bundle.generated {
        println!("Generated server key:         {}", config.tls.key.display());
        println!("Generated server certificate: {}", config.tls.cert.display());
    } else {
        println!("Server key and certificate already present, nothing generated");
    }
    println!("CA certificate:               {}", config.tls.ca_cert.display());
    ExitCode::SUCCESS
}

/// Print what the configured certificate files contain
fn run_inspect(config: &Config) -> ExitCode {
    let report = inspect(&config.tls);
    print!("{report}");
    if report.is_healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        client_auth = %config.tls.client_auth,
        "Starting mtls-gate"
    );

    let Some(bundle) = bootstrap_certificates(&config) else {
        return ExitCode::FAILURE;
    };

    let gate = match MtlsGate::new(&config.tls, &bundle) {
        Ok(gate) => gate,
        Err(e) => {
            error!("Failed to build TLS configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let server = match MtlsServer::bind(&config.server, gate).await {
        Ok(server) => server,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.serve().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}
