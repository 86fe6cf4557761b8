use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use super::helpers::{empty, require_project, require_target};
use crate::auth::{AdminCaller, Caller};
use crate::credentials::{CredentialType, Target, TargetProperties, TargetType};
use crate::error::ApiError;
use crate::state::AppState;
use crate::validation;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct TargetPropertiesRequest {
    pub credential_type: Option<String>,
    pub role_arn: Option<String>,
    pub policy_arns: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTargetRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub properties: Option<TargetPropertiesRequest>,
}

impl CreateTargetRequest {
    /// Checks fields in declaration order and reports the first failure.
    pub fn validate(&self) -> Result<Target, ApiError> {
        let name = validation::required("name", self.name.as_deref())?;
        validation::check_resource_name("name", name)?;

        let kind: TargetType = validation::required("type", self.kind.as_deref())?
            .parse()
            .map_err(ApiError::Validation)?;

        let props = validation::required("properties", self.properties.as_ref())?;
        let credential_type = match props.credential_type.as_deref() {
            Some(raw) => raw.parse().map_err(ApiError::Validation)?,
            None => CredentialType::default(),
        };

        let role_arn = validation::required("role_arn", props.role_arn.as_deref())?;
        validation::check_role_arn(role_arn)?;

        let policy_arns = props.policy_arns.clone().unwrap_or_default();
        validation::check_policy_arns(&policy_arns)?;

        Ok(Target {
            name: name.to_owned(),
            kind,
            properties: TargetProperties {
                credential_type,
                role_arn: role_arn.to_owned(),
                policy_arns,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/projects/{project}/targets",
            get(list_targets).post(create_target),
        )
        .route(
            "/projects/{project}/targets/{target}",
            get(get_target).delete(delete_target),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, project, body), err)]
async fn create_target(
    State(state): State<AppState>,
    admin: AdminCaller,
    project: Result<Path<String>, PathRejection>,
    body: Result<Json<CreateTargetRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(project) = project?;
    validation::check_resource_name("project name", &project)?;
    let Json(body) = body?;
    let target = body.validate()?;

    let broker = state.credentials.provider(&admin.caller()).await?;
    require_project(broker.as_ref(), &project).await?;
    if broker.target_exists(&project, &target.name).await? {
        return Err(ApiError::Validation(format!(
            "target '{}' already exists",
            target.name
        )));
    }

    broker.create_target(&project, &target).await?;
    tracing::info!(%project, target = %target.name, "target created");
    Ok(empty())
}

#[tracing::instrument(skip(state, project), err)]
async fn list_targets(
    State(state): State<AppState>,
    caller: Caller,
    project: Result<Path<String>, PathRejection>,
) -> Result<Json<Vec<String>>, ApiError> {
    let Path(project) = project?;
    validation::check_resource_name("project name", &project)?;

    let broker = state.credentials.provider(&caller).await?;
    require_project(broker.as_ref(), &project).await?;
    Ok(Json(broker.list_targets(&project).await?))
}

#[tracing::instrument(skip(state, path), err)]
async fn get_target(
    State(state): State<AppState>,
    caller: Caller,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<Target>, ApiError> {
    let Path((project, target)) = path?;
    validation::check_resource_name("project name", &project)?;
    validation::check_resource_name("target name", &target)?;

    let broker = state.credentials.provider(&caller).await?;
    require_project(broker.as_ref(), &project).await?;
    Ok(Json(broker.get_target(&project, &target).await?))
}

#[tracing::instrument(skip(state, path), err)]
async fn delete_target(
    State(state): State<AppState>,
    admin: AdminCaller,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path((project, target)) = path?;
    validation::check_resource_name("project name", &project)?;
    validation::check_resource_name("target name", &target)?;

    let broker = state.credentials.provider(&admin.caller()).await?;
    require_project(broker.as_ref(), &project).await?;
    require_target(broker.as_ref(), &project, &target).await?;

    broker.delete_target(&project, &target).await?;
    tracing::info!(%project, %target, "target deleted");
    Ok(empty())
}
