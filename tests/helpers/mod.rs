#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use cloudops::auth::Caller;
use cloudops::config::Config;
use cloudops::credentials::{
    BrokerError, CredentialBroker, CredentialProviderFactory, CredentialType, Project,
    ProjectCredentials, Target, TargetProperties, TargetType,
};
use cloudops::git::{GitError, ManifestSource};
use cloudops::state::AppState;
use cloudops::workflow::{
    Phase, SubmitOptions, WorkflowCatalog, WorkflowEngine, WorkflowError, WorkflowLogs,
    WorkflowStatus,
};

pub const ADMIN_SECRET: &str = "D34DB33FD34DB33FD34DB33FD34DB33F";

/// User token the fake credential backend refuses.
pub const DENIED_TOKEN: &str = "denied";

pub const CATALOG: &str = "
version: 1
workflow_template: cloudops-single-step
frameworks:
  cdk:
    sync: cdk deploy --require-approval never
    diff: cdk diff
";

pub const MANIFEST: &str = "
framework: cdk
type: diff
parameters:
  execute_container_image_uri: alpine:3.19
environment_variables:
  AWS_REGION: us-west-2
";

// ---------------------------------------------------------------------------
// Credential backend fake
// ---------------------------------------------------------------------------

/// Projects: `project1`, `projectalreadyexists`, `undeletableprojecttargets`
/// (has a target) and `undeletableproject` (deletion fails).
/// Targets in every existing project: `target1`, `targetalreadyexists` and
/// `undeletabletarget` (deletion fails).
#[derive(Default)]
pub struct FakeCredentials {
    pub mutations: Arc<AtomicUsize>,
}

struct FakeBroker {
    mutations: Arc<AtomicUsize>,
}

const PROJECTS: &[&str] = &[
    "project1",
    "projectalreadyexists",
    "undeletableprojecttargets",
    "undeletableproject",
];
const TARGETS: &[&str] = &["target1", "targetalreadyexists", "undeletabletarget"];

#[async_trait]
impl CredentialProviderFactory for FakeCredentials {
    async fn provider(&self, caller: &Caller) -> Result<Box<dyn CredentialBroker>, BrokerError> {
        if matches!(caller, Caller::User { token } if token == DENIED_TOKEN) {
            return Err(BrokerError::Backend("permission denied".into()));
        }
        Ok(Box::new(FakeBroker {
            mutations: Arc::clone(&self.mutations),
        }))
    }
}

impl FakeBroker {
    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialBroker for FakeBroker {
    async fn create_project(
        &self,
        _name: &str,
        _repository: Option<&str>,
    ) -> Result<ProjectCredentials, BrokerError> {
        self.mutated();
        Ok(ProjectCredentials {
            role_id: "roleid".into(),
            secret_id: "secretid".into(),
        })
    }

    async fn delete_project(&self, name: &str) -> Result<(), BrokerError> {
        if name == "undeletableproject" {
            return Err(BrokerError::Backend("error deleting project".into()));
        }
        self.mutated();
        Ok(())
    }

    async fn get_project(&self, name: &str) -> Result<Project, BrokerError> {
        if !PROJECTS.contains(&name) {
            return Err(BrokerError::NotFound("project".into()));
        }
        Ok(Project {
            name: name.to_owned(),
            repository: Some("git@github.com:org/repo.git".into()),
        })
    }

    async fn project_exists(&self, name: &str) -> Result<bool, BrokerError> {
        Ok(PROJECTS.contains(&name))
    }

    async fn create_target(&self, _project: &str, _target: &Target) -> Result<(), BrokerError> {
        self.mutated();
        Ok(())
    }

    async fn delete_target(&self, _project: &str, target: &str) -> Result<(), BrokerError> {
        if target == "undeletabletarget" {
            return Err(BrokerError::Backend("error deleting target".into()));
        }
        self.mutated();
        Ok(())
    }

    async fn get_target(&self, _project: &str, target: &str) -> Result<Target, BrokerError> {
        if !TARGETS.contains(&target) {
            return Err(BrokerError::NotFound("target".into()));
        }
        Ok(Target {
            name: target.to_owned(),
            kind: TargetType::AwsAccount,
            properties: TargetProperties {
                credential_type: CredentialType::AssumedRole,
                role_arn: "arn:aws:iam::123456789012:role/deploy".into(),
                policy_arns: vec![],
            },
        })
    }

    async fn target_exists(&self, _project: &str, target: &str) -> Result<bool, BrokerError> {
        Ok(TARGETS.contains(&target))
    }

    async fn list_targets(&self, project: &str) -> Result<Vec<String>, BrokerError> {
        if project == "undeletableprojecttargets" {
            return Ok(vec!["target1".into()]);
        }
        Ok(vec![])
    }
}

// ---------------------------------------------------------------------------
// Workflow engine fake
// ---------------------------------------------------------------------------

/// Workflow whose log stream stays open until it is cancelled.
pub const RUNNING_WORKFLOW: &str = "WORKFLOW_RUNNING";

/// `WORKFLOW_ALREADY_EXISTS`, `RUNNING_WORKFLOW` and anything listed exist;
/// every other name is missing. Submissions are recorded and named `success`.
#[derive(Default)]
pub struct FakeEngine {
    pub submitted: std::sync::Mutex<Vec<(String, SubmitOptions)>>,
    /// Fired once a followed log stream observes its cancellation.
    pub stream_cancelled: CancellationToken,
}

const LISTED: &[&str] = &[
    "project1-target1-abcde",
    "project1-target1-fghij",
    "project1-target2-zzzzz",
    "project1-target1-gone0",
];

#[async_trait]
impl WorkflowEngine for FakeEngine {
    async fn submit(&self, template: &str, opts: &SubmitOptions) -> Result<String, WorkflowError> {
        self.submitted
            .lock()
            .unwrap()
            .push((template.to_owned(), opts.clone()));
        Ok("success".into())
    }

    async fn status(&self, name: &str) -> Result<WorkflowStatus, WorkflowError> {
        let known = name == "WORKFLOW_ALREADY_EXISTS" || name == RUNNING_WORKFLOW;
        if !known && (!LISTED.contains(&name) || name.ends_with("gone0")) {
            return Err(WorkflowError::NotFound(name.to_owned()));
        }
        Ok(WorkflowStatus {
            name: name.to_owned(),
            status: Phase::Succeeded,
            created: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            finished: None,
        })
    }

    async fn logs(&self, name: &str) -> Result<WorkflowLogs, WorkflowError> {
        self.status(name).await?;
        Ok(WorkflowLogs {
            logs: "line 1\nline 2\n".into(),
        })
    }

    async fn log_stream(
        &self,
        name: &str,
        sink: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), WorkflowError> {
        self.status(name).await?;
        if name == RUNNING_WORKFLOW {
            let _ = sink.send("line 1".to_owned()).await;
            cancel.cancelled().await;
            self.stream_cancelled.cancel();
            return Ok(());
        }
        for line in ["line 1", "line 2"] {
            if sink.send(line.to_owned()).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, WorkflowError> {
        Ok(LISTED.iter().map(|s| (*s).to_owned()).collect())
    }
}

// ---------------------------------------------------------------------------
// Manifest source fake
// ---------------------------------------------------------------------------

/// Serves `repository1` at `sha123`. `slow.yaml` never answers in time.
#[derive(Default)]
pub struct FakeManifests {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ManifestSource for FakeManifests {
    async fn get_manifest_file(
        &self,
        repository: &str,
        commit_hash: &str,
        path: &str,
    ) -> Result<Vec<u8>, GitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if path == "slow.yaml" {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if repository != "repository1" || commit_hash != "sha123" {
            return Err(GitError::Fetch("repository not found".into()));
        }
        match path {
            "path/to/manifest.yaml" => Ok(MANIFEST.as_bytes().to_vec()),
            "path/to" => Err(GitError::NotAFile(path.to_owned())),
            _ => Err(GitError::NotFound(path.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// State and router
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub mutations: Arc<AtomicUsize>,
    pub engine: Arc<FakeEngine>,
    pub manifests: Arc<FakeManifests>,
}

impl TestApp {
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn manifest_fetches(&self) -> usize {
        self.manifests.calls.load(Ordering::SeqCst)
    }
}

pub fn test_config(vault_addr: &str) -> Config {
    test_config_with_timeout(vault_addr, 5)
}

pub fn test_config_with_timeout(vault_addr: &str, timeout_secs: u64) -> Config {
    let vars = HashMap::from([
        ("CLOUDOPS_ADMIN_SECRET", ADMIN_SECRET.to_owned()),
        ("VAULT_ADDR", vault_addr.to_owned()),
        ("VAULT_ROLE", "role".to_owned()),
        ("VAULT_SECRET", "secret".to_owned()),
        ("ARGO_ADDR", "http://127.0.0.1:1".to_owned()),
        ("SSH_PEM_FILE", "/dev/null".to_owned()),
        ("CLOUDOPS_REQUEST_TIMEOUT_SECS", timeout_secs.to_string()),
    ]);
    Config::from_lookup(|k| vars.get(k).cloned()).expect("test config")
}

/// Application wired to in-memory fakes. `vault_addr` is only used by the
/// health probe.
pub fn test_app_with_vault(vault_addr: &str) -> TestApp {
    test_app_with_config(test_config(vault_addr))
}

pub fn test_app_with_config(config: Config) -> TestApp {
    let credentials = FakeCredentials::default();
    let mutations = Arc::clone(&credentials.mutations);
    let engine = Arc::new(FakeEngine::default());
    let manifests = Arc::new(FakeManifests::default());

    let state = AppState {
        credentials: Arc::new(credentials),
        workflows: engine.clone(),
        manifests: manifests.clone(),
        catalog: Arc::new(WorkflowCatalog::from_yaml(CATALOG).expect("test catalog")),
        http: reqwest::Client::new(),
        config: Arc::new(config),
    };

    TestApp {
        router: cloudops::app(state),
        mutations,
        engine,
        manifests,
    }
}

pub fn test_app() -> TestApp {
    test_app_with_vault("http://127.0.0.1:1")
}

pub fn admin_auth() -> String {
    format!("vault:admin:{ADMIN_SECRET}")
}

pub fn user_auth() -> String {
    "vault:user:s.usertoken".into()
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

async fn send(
    app: &Router,
    method: &str,
    auth: &str,
    path: &str,
    body: Option<String>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if !auth.is_empty() {
        builder = builder.header("Authorization", auth);
    }
    let body = match body {
        Some(b) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(b)
        }
        None => Body::empty(),
    };
    let req = builder.body(body).unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// Send a GET request with the given `Authorization` header.
pub async fn get_json(app: &Router, auth: &str, path: &str) -> (StatusCode, Value) {
    send(app, "GET", auth, path, None).await
}

/// Send a POST request with a JSON body.
pub async fn post_json(app: &Router, auth: &str, path: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", auth, path, Some(body.to_string())).await
}

/// Send a POST request with a raw (possibly malformed) body.
pub async fn post_raw(app: &Router, auth: &str, path: &str, body: &str) -> (StatusCode, Value) {
    send(app, "POST", auth, path, Some(body.to_owned())).await
}

pub async fn delete_json(app: &Router, auth: &str, path: &str) -> (StatusCode, Value) {
    send(app, "DELETE", auth, path, None).await
}

/// Send a GET request and return the response with its body unread.
pub async fn get_response(app: &Router, auth: &str, path: &str) -> axum::http::Response<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if !auth.is_empty() {
        builder = builder.header("Authorization", auth);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Send a GET request and return the raw body text.
pub async fn get_text(app: &Router, auth: &str, path: &str) -> (StatusCode, String) {
    let resp = get_response(app, auth, path).await;
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

/// Extract JSON body from a response.
async fn body_json(resp: axum::http::Response<Body>) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
