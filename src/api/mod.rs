pub mod health;
pub mod helpers;
pub mod projects;
pub mod targets;
pub mod workflows;

use axum::Router;

use crate::state::AppState;

/// Request/response routes bounded by the request deadline.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(projects::router())
        .merge(targets::router())
        .merge(workflows::router())
}
