//! HTTP host service: authentication middleware and a minimal router

pub mod auth;
mod router;
mod server;

pub use auth::{
    AuthDecision, AuthFailure, AuthMethod, AuthenticatedClient, Authenticator, BasicFailure,
    auth_middleware, hash_password, verify_password,
};
pub use router::{AppState, create_router};
pub use server::Server;
