use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::auth::credential::{self, Caller};
use crate::error::ApiError;
use crate::state::AppState;

/// Any authenticated caller, admin or user.
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = extract_authorization(parts).ok_or(ApiError::Unauthorized)?;
        credential::authenticate(header, &state.config.admin_secret).ok_or(ApiError::Unauthorized)
    }
}

/// Caller holding the admin scope. A valid user credential is rejected with
/// the same 401 as a wrong secret.
#[derive(Debug, Clone, Copy)]
pub struct AdminCaller;

impl AdminCaller {
    pub fn caller(self) -> Caller {
        Caller::Admin
    }
}

impl FromRequestParts<AppState> for AdminCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match Caller::from_request_parts(parts, state).await? {
            Caller::Admin => Ok(Self),
            Caller::User { .. } => {
                tracing::debug!(path = %parts.uri.path(), "admin scope required");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

fn extract_authorization(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    if value.is_empty() {
        return None;
    }
    Some(value)
}
