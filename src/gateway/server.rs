//! Host server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::auth::Authenticator;
use super::router::{AppState, create_router};
use crate::config::{AuthType, Config};
use crate::{Error, Result};

/// HTTP server guarding its routes with the authentication middleware
pub struct Server {
    /// Configuration
    config: Config,
    /// Resolved authentication
    authenticator: Arc<Authenticator>,
}

impl Server {
    /// Create a new server, resolving the authentication configuration.
    pub fn new(config: Config) -> Result<Self> {
        let authenticator = Arc::new(Authenticator::from_config(&config)?);
        Ok(Self {
            config,
            authenticator,
        })
    }

    /// Run the server until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let resolved = self.authenticator.config();
        let strategies: Vec<&str> = resolved.types.iter().map(|t| t.as_str()).collect();

        info!("============================================================");
        info!("PROVIDER AUTH v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(strategies = ?strategies, public_paths = ?resolved.public_paths, "Authentication");

        if resolved.has(AuthType::Open) {
            warn!("AUTHENTICATION disabled - all requests are allowed");
        }

        // Warm-start the CA loader; requests share the same in-flight load
        if let Some(loader) = self
            .authenticator
            .mtls_handler()
            .and_then(|h| h.loader())
            .cloned()
        {
            tokio::spawn(async move {
                match loader.initialize().await {
                    Ok(()) => info!(certificates = loader.get_all().len(), "CA loader warm-started"),
                    Err(e) => warn!(error = %e, "CA loader warm-start failed, retrying on first request"),
                }
            });
        }

        let state = Arc::new(AppState {
            authenticator: Arc::clone(&self.authenticator),
        });
        let app = create_router(state);

        let listener = TcpListener::bind(addr).await?;
        info!("============================================================");

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Server stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
