//! provider-auth - request-time access control service
//!
//! Open, Basic and proxy-terminated mTLS authentication with X.509 chain
//! validation.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use provider_auth::{
    cli::{Cli, Command},
    config::Config,
    gateway::{Server, hash_password},
    mtls::{CertificateLoader, ChainValidator, HttpFetcher, LoadedCertificate},
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

    match cli.command {
        Some(Command::CheckConfig) => run_check_config(cli.config.as_deref()),
        Some(Command::VerifyCert { ref file }) => {
            run_verify_cert(cli.config.as_deref(), file).await
        }
        Some(Command::HashPassword { ref password }) => {
            println!("{}", hash_password(password));
            ExitCode::SUCCESS
        }
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Load and resolve configuration, printing what is active
fn run_check_config(path: Option<&Path>) -> ExitCode {
    let config = match Config::load(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let resolved = match config.auth.resolve() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.ucl.validator() {
        eprintln!("❌ {e}");
        return ExitCode::FAILURE;
    }

    let strategies: Vec<&str> = resolved.types.iter().map(|t| t.as_str()).collect();
    println!("✅ Configuration valid");
    println!("   Strategies: {}", strategies.join(", "));
    println!("   Public paths: {}", resolved.public_paths.join(", "));
    if !resolved.credentials.is_empty() {
        println!("   Basic users: {}", resolved.credentials.len());
    }
    if let Some(mtls) = &resolved.mtls {
        println!("   mTLS trusted subjects: {}", mtls.trusted_subjects.len());
        println!("   mTLS trusted issuers: {}", mtls.trusted_issuers.len());
        println!("   mTLS config endpoints: {}", mtls.config_endpoints.len());
        println!(
            "   mTLS CA chain: {}",
            if mtls.ca_chain_file.is_some() { "configured" } else { "none" }
        );
    }
    if let Ok(prefixes) = config.ucl.endpoint_prefixes() {
        if !prefixes.is_empty() {
            println!("   UCL guarded paths: {}", prefixes.join(", "));
        }
    }
    ExitCode::SUCCESS
}

/// Validate a certificate file against the configured CA chain
async fn run_verify_cert(path: Option<&Path>, file: &Path) -> ExitCode {
    let mtls = match Config::load(path).and_then(|c| c.auth.resolve()) {
        Ok(resolved) => match resolved.mtls {
            Some(mtls) => mtls,
            None => {
                eprintln!("❌ mTLS authentication is not configured");
                return ExitCode::FAILURE;
            }
        },
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let pem = match tokio::fs::read_to_string(file).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("❌ Failed to read {}: {e}", file.display());
            return ExitCode::FAILURE;
        }
    };
    let cert = match LoadedCertificate::from_pem(&pem) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let loader = Arc::new(CertificateLoader::from_config(&mtls, Arc::new(HttpFetcher::new())));
    if !loader.has_ca_source() {
        eprintln!("❌ No caChainFile configured, nothing to validate against");
        return ExitCode::FAILURE;
    }
    if let Err(e) = loader.initialize().await {
        eprintln!("❌ {e}");
        return ExitCode::FAILURE;
    }

    let result = ChainValidator::new(loader).validate(&cert);
    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
    if result.is_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Run the server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting provider-auth"
    );

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
