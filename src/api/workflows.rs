use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::helpers::{require_project, require_target};
use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;
use crate::validation;
use crate::workflow::{
    self, PROJECT_LABEL, SubmitOptions, TARGET_LABEL, WorkflowCatalog, WorkflowError,
    WorkflowLogs, WorkflowStatus,
};

/// Buffered log lines between the engine and a slow client.
const LOG_STREAM_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A workflow submission. Carries either an inline definition or a pointer
/// to a manifest in git, never both.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CreateWorkflowRequest {
    pub project_name: Option<String>,
    pub target_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,

    // inline
    pub framework: Option<String>,
    pub parameters: Option<BTreeMap<String, String>>,
    pub arguments: Option<Vec<String>>,
    pub environment_variables: Option<BTreeMap<String, String>>,
    pub workflow_template_name: Option<String>,

    // git
    pub repository: Option<String>,
    pub commit_hash: Option<String>,
    pub path: Option<String>,
}

/// Pointer to a manifest at an exact commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource<'a> {
    pub repository: &'a str,
    pub commit_hash: &'a str,
    pub path: &'a str,
}

/// A fully validated submission, ready for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedWorkflow {
    pub project: String,
    pub target: String,
    pub template: String,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct CreateWorkflowResponse {
    pub workflow_name: String,
}

impl CreateWorkflowRequest {
    fn has_inline(&self) -> bool {
        self.framework.is_some()
            || self.parameters.is_some()
            || self.arguments.is_some()
            || self.environment_variables.is_some()
            || self.workflow_template_name.is_some()
    }

    fn has_git(&self) -> bool {
        self.repository.is_some() || self.commit_hash.is_some() || self.path.is_some()
    }

    /// `Some` when the request points at a git manifest. Both or neither
    /// source is a validation error.
    pub fn git_source(&self) -> Result<Option<GitSource<'_>>, ApiError> {
        match (self.has_inline(), self.has_git()) {
            (true, false) => Ok(None),
            (false, true) => {
                let repository = validation::required("repository", self.repository.as_deref())?;
                validation::check_repository(repository)?;
                let commit_hash =
                    validation::required("commit_hash", self.commit_hash.as_deref())?;
                validation::check_commit_hash(commit_hash)?;
                let path = validation::required("path", self.path.as_deref())?;
                validation::check_manifest_path(path)?;
                Ok(Some(GitSource {
                    repository,
                    commit_hash,
                    path,
                }))
            }
            _ => Err(ApiError::Validation(
                "exactly one of an inline workflow or a git manifest must be provided".into(),
            )),
        }
    }

    /// Parse a manifest fetched from git into the inline shape. Project and
    /// target from `self` (the request) and the request `type` win over the
    /// manifest's own values.
    pub fn resolve_manifest(&self, manifest: &[u8]) -> Result<Self, ApiError> {
        let mut parsed: Self = serde_yaml::from_slice(manifest)
            .map_err(|e| ApiError::Validation(format!("invalid workflow manifest: {e}")))?;
        if parsed.has_git() {
            return Err(ApiError::Validation(
                "workflow manifest must not reference another manifest".into(),
            ));
        }
        if self.project_name.is_some() {
            parsed.project_name.clone_from(&self.project_name);
        }
        if self.target_name.is_some() {
            parsed.target_name.clone_from(&self.target_name);
        }
        if self.kind.is_some() {
            parsed.kind.clone_from(&self.kind);
        }
        Ok(parsed)
    }

    /// The validated project and target names.
    pub fn names(&self) -> Result<(&str, &str), ApiError> {
        let project = validation::required("project name", self.project_name.as_deref())?;
        validation::check_resource_name("project name", project)?;
        let target = validation::required("target name", self.target_name.as_deref())?;
        validation::check_resource_name("target name", target)?;
        Ok((project, target))
    }

    /// Validate an inline request against the catalog and assemble the
    /// engine parameters.
    pub fn validate(&self, catalog: &WorkflowCatalog) -> Result<ValidatedWorkflow, ApiError> {
        let (project, target) = self.names()?;

        let kind = validation::required("type", self.kind.as_deref())?;
        let framework = validation::required("framework", self.framework.as_deref())?;
        if !catalog.has_framework(framework) {
            return Err(ApiError::Validation(format!(
                "framework must be one of [{}] (got '{framework}')",
                catalog
                    .frameworks
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        let Some(command) = catalog.command(framework, kind) else {
            return Err(ApiError::Validation(format!(
                "type must be one of [{}] for framework '{framework}' (got '{kind}')",
                catalog.types(framework).join(", ")
            )));
        };

        let supplied = validation::required("parameters", self.parameters.as_ref())?;
        let image = validation::required(
            "execute_container_image_uri",
            supplied.get("execute_container_image_uri").map(String::as_str),
        )?;
        validation::check_container_image("execute_container_image_uri", image)?;

        let env = self.environment_variables.clone().unwrap_or_default();
        for name in env.keys() {
            validation::check_env_var_name(name)?;
        }

        let template = match self.workflow_template_name.as_deref() {
            Some(name) => {
                validation::check_template_name(name)?;
                name.to_owned()
            }
            None => catalog.workflow_template.clone(),
        };

        let mut execute_command = command.to_owned();
        for arg in self.arguments.iter().flatten() {
            if arg.chars().any(char::is_control) {
                return Err(ApiError::Validation(
                    "arguments must not contain control characters".into(),
                ));
            }
            execute_command.push(' ');
            execute_command.push_str(arg);
        }

        let mut parameters = supplied.clone();
        parameters.insert("execute_command".into(), execute_command);
        parameters.insert("project_name".into(), project.to_owned());
        parameters.insert("target_name".into(), target.to_owned());
        parameters.insert("framework".into(), framework.to_owned());
        parameters.insert("type".into(), kind.to_owned());
        parameters.insert(
            "environment_variables".into(),
            serde_json::to_string(&env).map_err(|e| ApiError::Internal(e.into()))?,
        );

        Ok(ValidatedWorkflow {
            project: project.to_owned(),
            target: target.to_owned(),
            template,
            parameters,
        })
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(create_workflow))
        .route(
            "/projects/{project}/targets/{target}/operations",
            post(create_operation),
        )
        .route(
            "/projects/{project}/targets/{target}/workflows",
            get(list_workflows),
        )
        .route("/workflows/{name}", get(get_workflow_status))
        .route("/workflows/{name}/logs", get(get_workflow_logs))
}

/// Long-lived routes that must not sit behind the request deadline.
pub fn stream_router() -> Router<AppState> {
    Router::new().route("/workflows/{name}/logstream", get(stream_workflow_logs))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), err)]
async fn create_workflow(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<CreateWorkflowRequest>, JsonRejection>,
) -> Result<Json<CreateWorkflowResponse>, ApiError> {
    let Json(body) = body?;
    submit(&state, &caller, body).await
}

#[tracing::instrument(skip(state, path, body), err)]
async fn create_operation(
    State(state): State<AppState>,
    caller: Caller,
    path: Result<Path<(String, String)>, PathRejection>,
    body: Result<Json<CreateWorkflowRequest>, JsonRejection>,
) -> Result<Json<CreateWorkflowResponse>, ApiError> {
    let Path((project, target)) = path?;
    let Json(mut body) = body?;
    body.project_name = Some(project);
    body.target_name = Some(target);
    submit(&state, &caller, body).await
}

/// Shared submission path for both workflow endpoints. A git manifest is
/// only fetched once the caller, project and target have been checked.
async fn submit(
    state: &AppState,
    caller: &Caller,
    request: CreateWorkflowRequest,
) -> Result<Json<CreateWorkflowResponse>, ApiError> {
    let workflow = match request.git_source()? {
        None => {
            let workflow = request.validate(&state.catalog)?;
            require_destination(state, caller, &workflow.project, &workflow.target).await?;
            workflow
        }
        Some(source) => {
            let (project, target) = request.names()?;
            require_destination(state, caller, project, target).await?;
            let manifest = state
                .manifests
                .get_manifest_file(source.repository, source.commit_hash, source.path)
                .await?;
            request.resolve_manifest(&manifest)?.validate(&state.catalog)?
        }
    };

    let opts = SubmitOptions {
        generate_name: workflow::generate_name(&workflow.project, &workflow.target),
        labels: BTreeMap::from([
            (PROJECT_LABEL.to_owned(), workflow.project.clone()),
            (TARGET_LABEL.to_owned(), workflow.target.clone()),
        ]),
        parameters: workflow.parameters,
    };
    let workflow_name = state.workflows.submit(&workflow.template, &opts).await?;

    tracing::info!(
        project = %workflow.project,
        target = %workflow.target,
        workflow = %workflow_name,
        "workflow submitted"
    );
    Ok(Json(CreateWorkflowResponse { workflow_name }))
}

async fn require_destination(
    state: &AppState,
    caller: &Caller,
    project: &str,
    target: &str,
) -> Result<(), ApiError> {
    let broker = state.credentials.provider(caller).await?;
    require_project(broker.as_ref(), project).await?;
    require_target(broker.as_ref(), project, target).await
}

#[tracing::instrument(skip(state, name), err)]
async fn get_workflow_status(
    State(state): State<AppState>,
    _caller: Caller,
    name: Result<Path<String>, PathRejection>,
) -> Result<Json<WorkflowStatus>, ApiError> {
    let Path(name) = name?;
    validation::check_workflow_name(&name)?;
    Ok(Json(state.workflows.status(&name).await?))
}

#[tracing::instrument(skip(state, name), err)]
async fn get_workflow_logs(
    State(state): State<AppState>,
    _caller: Caller,
    name: Result<Path<String>, PathRejection>,
) -> Result<Json<WorkflowLogs>, ApiError> {
    let Path(name) = name?;
    validation::check_workflow_name(&name)?;
    Ok(Json(state.workflows.logs(&name).await?))
}

/// Streams log lines as plain text. Disconnecting the client drops the
/// body, which cancels the upstream stream.
#[tracing::instrument(skip(state, name), err)]
async fn stream_workflow_logs(
    State(state): State<AppState>,
    _caller: Caller,
    name: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(name) = name?;
    validation::check_workflow_name(&name)?;
    // Surface a missing workflow as an error instead of an empty 200 stream.
    state.workflows.status(&name).await?;

    let (tx, rx) = mpsc::channel::<String>(LOG_STREAM_BUFFER);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let engine = Arc::clone(&state.workflows);
    let workflow = name.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.log_stream(&workflow, tx, cancel).await {
            tracing::warn!(%workflow, error = %e, "log stream ended with error");
        }
    });

    let body = ReceiverStream::new(rx).map(move |mut line| {
        let _keep = &guard;
        line.push('\n');
        Ok::<_, Infallible>(Bytes::from(line))
    });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}

#[tracing::instrument(skip(state, path), err)]
async fn list_workflows(
    State(state): State<AppState>,
    _caller: Caller,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<Vec<WorkflowStatus>>, ApiError> {
    let Path((project, target)) = path?;
    validation::check_resource_name("project name", &project)?;
    validation::check_resource_name("target name", &target)?;

    let prefix = workflow::generate_name(&project, &target);
    let names = state.workflows.list().await?;

    let mut statuses = Vec::new();
    for name in names.iter().filter(|n| n.starts_with(&prefix)) {
        match state.workflows.status(name).await {
            Ok(status) => statuses.push(status),
            // Deleted between list and status.
            Err(WorkflowError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Json(statuses))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const CATALOG: &str = "
version: 1
workflow_template: cloudops-single-step
frameworks:
  cdk:
    sync: cdk deploy
    diff: cdk diff
";

    fn catalog() -> WorkflowCatalog {
        WorkflowCatalog::from_yaml(CATALOG).unwrap()
    }

    fn inline() -> CreateWorkflowRequest {
        CreateWorkflowRequest {
            project_name: Some("project1".into()),
            target_name: Some("target1".into()),
            kind: Some("sync".into()),
            framework: Some("cdk".into()),
            parameters: Some(BTreeMap::from([(
                "execute_container_image_uri".to_owned(),
                "alpine:3.19".to_owned(),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn inline_request_builds_parameters() {
        let mut req = inline();
        req.arguments = Some(vec!["--all".into()]);
        req.environment_variables = Some(BTreeMap::from([("AWS_REGION".into(), "us-west-2".into())]));

        let wf = req.validate(&catalog()).unwrap();
        assert_eq!(wf.template, "cloudops-single-step");
        assert_eq!(wf.parameters["execute_command"], "cdk deploy --all");
        assert_eq!(wf.parameters["project_name"], "project1");
        assert_eq!(wf.parameters["target_name"], "target1");
        assert_eq!(wf.parameters["execute_container_image_uri"], "alpine:3.19");
        assert_eq!(wf.parameters["environment_variables"], r#"{"AWS_REGION":"us-west-2"}"#);
    }

    #[test]
    fn explicit_template_overrides_catalog_default() {
        let mut req = inline();
        req.workflow_template_name = Some("custom-template".into());
        assert_eq!(req.validate(&catalog()).unwrap().template, "custom-template");
    }

    #[rstest]
    #[case::image_present(
        |r: &mut CreateWorkflowRequest| { r.parameters = Some(BTreeMap::new()); },
        "execute_container_image_uri must be present"
    )]
    #[case::image_valid(
        |r: &mut CreateWorkflowRequest| {
            r.parameters = Some(BTreeMap::from([(
                "execute_container_image_uri".to_owned(),
                "alpine; rm -rf /".to_owned(),
            )]));
        },
        "forbidden characters"
    )]
    #[case::framework_present(|r: &mut CreateWorkflowRequest| r.framework = None, "framework must be present")]
    #[case::framework_valid(|r: &mut CreateWorkflowRequest| r.framework = Some("pulumi".into()), "framework must be one of")]
    #[case::parameters_present(|r: &mut CreateWorkflowRequest| r.parameters = None, "parameters must be present")]
    #[case::project_name_present(|r: &mut CreateWorkflowRequest| r.project_name = None, "project name must be present")]
    #[case::target_name_present(|r: &mut CreateWorkflowRequest| r.target_name = None, "target name must be present")]
    #[case::type_present(|r: &mut CreateWorkflowRequest| r.kind = None, "type must be present")]
    #[case::type_valid(|r: &mut CreateWorkflowRequest| r.kind = Some("destroy".into()), "type must be one of")]
    #[case::env_var_name(
        |r: &mut CreateWorkflowRequest| {
            r.environment_variables = Some(BTreeMap::from([("1BAD".into(), "x".into())]));
        },
        "environment variable"
    )]
    fn invalid_inline_requests(#[case] mutate: fn(&mut CreateWorkflowRequest), #[case] needle: &str) {
        let mut req = inline();
        mutate(&mut req);
        let err = req.validate(&catalog()).unwrap_err();
        assert!(err.to_string().contains(needle), "{err}");
    }

    #[test]
    fn both_sources_rejected() {
        let mut req = inline();
        req.repository = Some("repository1".into());
        assert!(matches!(req.git_source(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn neither_source_rejected() {
        let req = CreateWorkflowRequest {
            project_name: Some("project1".into()),
            target_name: Some("target1".into()),
            kind: Some("sync".into()),
            ..Default::default()
        };
        assert!(matches!(req.git_source(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn git_source_extracted() {
        let req = CreateWorkflowRequest {
            repository: Some("repository1".into()),
            commit_hash: Some("sha123".into()),
            path: Some("path/to/manifest.yaml".into()),
            kind: Some("sync".into()),
            ..Default::default()
        };
        assert_eq!(
            req.git_source().unwrap(),
            Some(GitSource {
                repository: "repository1",
                commit_hash: "sha123",
                path: "path/to/manifest.yaml",
            })
        );
    }

    #[test]
    fn git_source_requires_all_fields() {
        let req = CreateWorkflowRequest {
            repository: Some("repository1".into()),
            path: Some("path/to/manifest.yaml".into()),
            ..Default::default()
        };
        let err = req.git_source().unwrap_err();
        assert_eq!(err.to_string(), "commit_hash must be present");
    }

    #[test]
    fn manifest_values_yield_to_request() {
        let req = CreateWorkflowRequest {
            project_name: Some("project1".into()),
            target_name: Some("target1".into()),
            kind: Some("diff".into()),
            ..Default::default()
        };
        let manifest = b"
project_name: other
target_name: othertarget
type: sync
framework: cdk
parameters:
  execute_container_image_uri: alpine:3.19
";
        let merged = req.resolve_manifest(manifest).unwrap();
        assert_eq!(merged.project_name.as_deref(), Some("project1"));
        assert_eq!(merged.target_name.as_deref(), Some("target1"));
        assert_eq!(merged.kind.as_deref(), Some("diff"));
        assert_eq!(
            merged.validate(&catalog()).unwrap().parameters["execute_command"],
            "cdk diff"
        );
    }

    #[test]
    fn manifest_cannot_chain_to_git() {
        let manifest = b"repository: elsewhere\ncommit_hash: abc\npath: x.yaml\n";
        let err = CreateWorkflowRequest::default()
            .resolve_manifest(manifest)
            .unwrap_err();
        assert!(err.to_string().contains("must not reference"));
    }

    #[test]
    fn manifest_must_parse() {
        let err = CreateWorkflowRequest::default()
            .resolve_manifest(b"parameters: [unterminated")
            .unwrap_err();
        assert!(err.to_string().contains("invalid workflow manifest"));
    }
}
