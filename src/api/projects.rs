use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use super::helpers::{empty, require_project};
use crate::auth::{AdminCaller, Caller};
use crate::credentials::{Project, ProjectCredentials};
use crate::error::ApiError;
use crate::state::AppState;
use crate::validation;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CreateProjectRequest {
    pub name: Option<String>,
    pub repository: Option<String>,
}

impl CreateProjectRequest {
    /// Returns the validated project name.
    pub fn validate(&self) -> Result<&str, ApiError> {
        let name = validation::required("name", self.name.as_deref())?;
        validation::check_resource_name("name", name)?;
        if let Some(repository) = &self.repository {
            validation::check_repository(repository)?;
        }
        Ok(name)
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", post(create_project))
        .route("/projects/{project}", get(get_project).delete(delete_project))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), err)]
async fn create_project(
    State(state): State<AppState>,
    admin: AdminCaller,
    body: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<Json<ProjectCredentials>, ApiError> {
    let Json(body) = body?;
    let name = body.validate()?;

    let broker = state.credentials.provider(&admin.caller()).await?;
    if broker.project_exists(name).await? {
        return Err(ApiError::Validation(format!("project '{name}' already exists")));
    }

    let credentials = broker
        .create_project(name, body.repository.as_deref())
        .await?;
    tracing::info!(project = name, "project created");
    Ok(Json(credentials))
}

#[tracing::instrument(skip(state, name), err)]
async fn get_project(
    State(state): State<AppState>,
    caller: Caller,
    name: Result<Path<String>, PathRejection>,
) -> Result<Json<Project>, ApiError> {
    let Path(name) = name?;
    validation::check_resource_name("name", &name)?;

    let broker = state.credentials.provider(&caller).await?;
    Ok(Json(broker.get_project(&name).await?))
}

#[tracing::instrument(skip(state, name), err)]
async fn delete_project(
    State(state): State<AppState>,
    admin: AdminCaller,
    name: Result<Path<String>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(name) = name?;
    validation::check_resource_name("name", &name)?;

    let broker = state.credentials.provider(&admin.caller()).await?;
    require_project(broker.as_ref(), &name).await?;

    if !broker.list_targets(&name).await?.is_empty() {
        return Err(ApiError::Validation(
            "project has existing targets, not deleting".into(),
        ));
    }

    broker.delete_project(&name).await?;
    tracing::info!(project = %name, "project deleted");
    Ok(empty())
}
