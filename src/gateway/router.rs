//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use super::auth::{AuthenticatedClient, Authenticator, auth_middleware};
use crate::config::AuthType;

/// Shared application state
pub struct AppState {
    /// Request authentication
    pub authenticator: Arc<Authenticator>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let authenticator = Arc::clone(&state.authenticator);

    Router::new()
        .route("/health", get(health_handler))
        .route("/whoami", get(whoami_handler))
        // Authentication middleware (applied before other layers)
        .layer(middleware::from_fn_with_state(authenticator, auth_middleware))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.authenticator.config();
    let strategies: Vec<&str> = config.types.iter().map(|t| t.as_str()).collect();

    // CA loader state only matters when chain validation is configured
    let ca_loaded = state
        .authenticator
        .mtls_handler()
        .and_then(|h| h.loader())
        .map(|loader| loader.is_initialized());

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "strategies": strategies,
            "mtls": config.has(AuthType::Mtls),
            "caCertificatesLoaded": ca_loaded,
        })),
    )
}

/// GET /whoami - the principal the middleware accepted
async fn whoami_handler(Extension(client): Extension<AuthenticatedClient>) -> impl IntoResponse {
    Json(client)
}
