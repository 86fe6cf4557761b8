use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Response {
    match probe_vault(&state.http, &state.config.vault_addr, state.config.request_timeout).await {
        Ok(()) => (StatusCode::OK, "Health check succeeded\n").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Health check failed\n").into_response()
        }
    }
}

/// Probe the secret backend's health endpoint.
///
/// 200 and 429 (standby) count as healthy, even if the body then fails to
/// read. Anything else, including a connection failure, is unhealthy.
pub async fn probe_vault(
    http: &reqwest::Client,
    vault_addr: &str,
    timeout: Duration,
) -> Result<(), ApiError> {
    let url = format!("{}/v1/sys/health", vault_addr.trim_end_matches('/'));
    let resp = http
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ApiError::ServiceUnavailable(format!("secret backend unreachable: {e}")))?;

    match resp.status() {
        StatusCode::OK | StatusCode::TOO_MANY_REQUESTS => {
            if let Err(e) = resp.bytes().await {
                tracing::debug!(error = %e, "ignoring unreadable health response body");
            }
            Ok(())
        }
        status => Err(ApiError::ServiceUnavailable(format!(
            "secret backend returned {status}"
        ))),
    }
}
