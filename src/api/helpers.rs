use axum::Json;
use serde_json::{Value, json};

use crate::credentials::CredentialBroker;
use crate::error::ApiError;

/// Body for successful mutations that return nothing.
pub fn empty() -> Json<Value> {
    Json(json!({}))
}

/// Fail with `NotFound` unless the project exists in the secret backend.
pub async fn require_project(broker: &dyn CredentialBroker, project: &str) -> Result<(), ApiError> {
    if !broker.project_exists(project).await? {
        return Err(ApiError::NotFound("project".into()));
    }
    Ok(())
}

pub async fn require_target(
    broker: &dyn CredentialBroker,
    project: &str,
    target: &str,
) -> Result<(), ApiError> {
    if !broker.target_exists(project, target).await? {
        return Err(ApiError::NotFound("target".into()));
    }
    Ok(())
}
