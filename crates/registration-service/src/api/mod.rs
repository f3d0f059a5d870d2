//! HTTP API for the registration service.

mod handlers;
mod middleware;
mod types;

pub use handlers::*;
pub use middleware::{logging_middleware, rate_limit_middleware, RateLimitState};
pub use types::*;

use crate::sessions::SessionRegistry;
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use registration_core::Collaborators;
use tower_http::trace::TraceLayer;

/// Room for a base64-encoded image at the default size ceiling.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Live registrations
    pub sessions: SessionRegistry,
    /// Collaborators handed to every new registration
    pub collaborators: Collaborators,
}

impl AppState {
    pub fn new(sessions: SessionRegistry, collaborators: Collaborators) -> Self {
        Self {
            sessions,
            collaborators,
        }
    }
}

/// Create the API router with the default rate limit.
pub fn create_router(state: AppState) -> Router {
    create_router_with_rate_limit(state, RateLimitState::new(60, 20))
}

/// Create the API router with custom rate limiting.
pub fn create_router_with_rate_limit(state: AppState, rate_limit: RateLimitState) -> Router {
    let registrations = Router::new()
        .route("/v1/registrations", post(handlers::create_registration))
        .route("/v1/registrations/:id", get(handlers::get_registration))
        .route("/v1/registrations/:id/person", put(handlers::update_person))
        .route(
            "/v1/registrations/:id/contacts/:slot",
            put(handlers::set_contact),
        )
        .route(
            "/v1/registrations/:id/phone/code",
            post(handlers::request_phone_code),
        )
        .route(
            "/v1/registrations/:id/phone/verify",
            post(handlers::verify_phone_code),
        )
        .route(
            "/v1/registrations/:id/document",
            post(handlers::upload_document),
        )
        .route(
            "/v1/registrations/:id/face",
            post(handlers::capture_face).delete(handlers::cancel_face_capture),
        )
        .route("/v1/registrations/:id/submit", post(handlers::submit))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum_middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ));

    Router::new()
        // Health check (no rate limiting)
        .route("/health", get(handlers::health))
        .merge(registrations)
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
