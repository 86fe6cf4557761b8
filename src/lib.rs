pub mod config;
pub mod error;
pub mod state;
pub mod validation;

// Collaborators
pub mod credentials;
pub mod git;
pub mod workflow;

// HTTP surface
pub mod api;
pub mod auth;

use axum::Router;
use axum::http::StatusCode;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// A request may span several backend calls, each bounded by the configured
/// timeout; the whole request gets this many of them. Expiry is a backend
/// failure, answered with 400.
const REQUEST_DEADLINE_FACTOR: u32 = 4;

/// The full application router. Log streaming and health sit outside the
/// request deadline.
pub fn app(state: AppState) -> Router {
    let deadline = state.config.request_timeout * REQUEST_DEADLINE_FACTOR;
    Router::new()
        .merge(api::router())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::BAD_REQUEST,
            deadline,
        ))
        .merge(api::workflows::stream_router())
        .merge(api::health::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
