use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

use super::{
    BrokerError, CredentialBroker, CredentialProviderFactory, CredentialType, Project,
    ProjectCredentials, Target, TargetProperties, TargetType,
};
use crate::auth::Caller;

const NAME_PREFIX: &str = "cloudops";
const TOKEN_HEADER: &str = "X-Vault-Token";

// ---------------------------------------------------------------------------
// Backend paths
// ---------------------------------------------------------------------------

fn project_role_path(project: &str) -> String {
    format!("auth/approle/role/{NAME_PREFIX}-{project}")
}

fn project_policy_name(project: &str) -> String {
    format!("{NAME_PREFIX}-project-{project}")
}

fn project_record_path(project: &str) -> String {
    format!("secret/data/{NAME_PREFIX}/projects/{project}")
}

fn project_record_metadata_path(project: &str) -> String {
    format!("secret/metadata/{NAME_PREFIX}/projects/{project}")
}

fn target_role_prefix(project: &str) -> String {
    format!("{NAME_PREFIX}-{project}-")
}

fn target_role_path(project: &str, target: &str) -> String {
    format!("aws/roles/{}{target}", target_role_prefix(project))
}

/// ACL granting a project's `AppRole` access to its own targets' credentials.
fn project_policy_document(project: &str) -> String {
    let prefix = target_role_prefix(project);
    format!(
        "path \"aws/creds/{prefix}*\" {{\n  capabilities = [\"read\", \"update\"]\n}}\n\
         path \"aws/sts/{prefix}*\" {{\n  capabilities = [\"read\", \"update\"]\n}}\n"
    )
}

fn backend_error(status: StatusCode, body: Option<&Value>) -> BrokerError {
    let detail = body
        .and_then(|b| b.get("errors"))
        .and_then(Value::as_array)
        .map(|errs| {
            errs.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; ")
        })
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| status.to_string());
    BrokerError::Backend(format!(
        "secret backend returned {}: {detail}",
        status.as_u16()
    ))
}

fn string_at(body: &Value, pointer: &str) -> Result<String, BrokerError> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| {
            BrokerError::Backend(format!("secret backend response missing '{pointer}'"))
        })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Unauthenticated handle to the Vault HTTP API.
#[derive(Clone)]
pub struct VaultClient {
    http: reqwest::Client,
    addr: String,
    timeout: Duration,
}

impl VaultClient {
    pub fn new(http: reqwest::Client, addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            addr: addr.into().trim_end_matches('/').to_owned(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.addr)
    }

    /// Exchange an `AppRole` role/secret pair for a client token.
    #[tracing::instrument(skip_all, err)]
    pub async fn approle_login(&self, role_id: &str, secret_id: &str) -> Result<String, BrokerError> {
        let resp = self
            .http
            .post(self.url("auth/approle/login"))
            .timeout(self.timeout)
            .json(&json!({ "role_id": role_id, "secret_id": secret_id }))
            .send()
            .await?;
        let status = resp.status();
        let body: Option<Value> = resp.json().await.ok();
        if !status.is_success() {
            return Err(backend_error(status, body.as_ref()));
        }
        string_at(&body.unwrap_or_default(), "/auth/client_token")
    }

    pub fn with_token(&self, token: impl Into<String>) -> VaultBroker {
        VaultBroker {
            client: self.clone(),
            token: token.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Vault client bound to a token.
pub struct VaultBroker {
    client: VaultClient,
    token: String,
}

impl VaultBroker {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, Option<Value>), BrokerError> {
        let mut req = self
            .client
            .http
            .request(method, self.client.url(path))
            .header(TOKEN_HEADER, &self.token)
            .timeout(self.client.timeout);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        let value = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };
        Ok((status, value))
    }

    /// `None` when the backend answers 404.
    async fn read(&self, path: &str) -> Result<Option<Value>, BrokerError> {
        let (status, body) = self.request(Method::GET, path, None).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(body.unwrap_or_default())),
            s => Err(backend_error(s, body.as_ref())),
        }
    }

    async fn write(&self, path: &str, payload: &Value) -> Result<Value, BrokerError> {
        let (status, body) = self.request(Method::POST, path, Some(payload)).await?;
        if !status.is_success() {
            return Err(backend_error(status, body.as_ref()));
        }
        Ok(body.unwrap_or_default())
    }

    async fn delete(&self, path: &str) -> Result<(), BrokerError> {
        let (status, body) = self.request(Method::DELETE, path, None).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(backend_error(status, body.as_ref()))
    }
}

#[async_trait]
impl CredentialBroker for VaultBroker {
    #[tracing::instrument(skip(self), err)]
    async fn create_project(
        &self,
        name: &str,
        repository: Option<&str>,
    ) -> Result<ProjectCredentials, BrokerError> {
        let policy = project_policy_name(name);
        self.write(
            &format!("sys/policies/acl/{policy}"),
            &json!({ "policy": project_policy_document(name) }),
        )
        .await?;

        let role_path = project_role_path(name);
        self.write(
            &role_path,
            &json!({
                "token_policies": [policy],
                "token_ttl": "1h",
                "token_max_ttl": "4h",
                "secret_id_num_uses": 0,
            }),
        )
        .await?;

        let role = self
            .read(&format!("{role_path}/role-id"))
            .await?
            .ok_or_else(|| BrokerError::Backend("project role-id missing after creation".into()))?;
        let role_id = string_at(&role, "/data/role_id")?;

        let secret = self.write(&format!("{role_path}/secret-id"), &json!({})).await?;
        let secret_id = string_at(&secret, "/data/secret_id")?;

        self.write(
            &project_record_path(name),
            &json!({ "data": { "repository": repository } }),
        )
        .await?;

        tracing::info!(project = name, "project credentials provisioned");
        Ok(ProjectCredentials { role_id, secret_id })
    }

    #[tracing::instrument(skip(self), err)]
    async fn delete_project(&self, name: &str) -> Result<(), BrokerError> {
        self.delete(&project_role_path(name)).await?;
        self.delete(&format!("sys/policies/acl/{}", project_policy_name(name)))
            .await?;
        self.delete(&project_record_metadata_path(name)).await?;
        tracing::info!(project = name, "project credentials revoked");
        Ok(())
    }

    async fn get_project(&self, name: &str) -> Result<Project, BrokerError> {
        if !self.project_exists(name).await? {
            return Err(BrokerError::NotFound("project".into()));
        }
        let repository = self
            .read(&project_record_path(name))
            .await?
            .and_then(|record| {
                record
                    .pointer("/data/data/repository")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            });
        Ok(Project {
            name: name.to_owned(),
            repository,
        })
    }

    async fn project_exists(&self, name: &str) -> Result<bool, BrokerError> {
        Ok(self.read(&project_role_path(name)).await?.is_some())
    }

    #[tracing::instrument(skip(self, target), fields(target = %target.name), err)]
    async fn create_target(&self, project: &str, target: &Target) -> Result<(), BrokerError> {
        let props = &target.properties;
        self.write(
            &target_role_path(project, &target.name),
            &json!({
                "credential_type": props.credential_type.as_str(),
                "role_arns": [props.role_arn],
                "policy_arns": props.policy_arns,
            }),
        )
        .await?;
        tracing::info!(project, target = %target.name, "target created");
        Ok(())
    }

    #[tracing::instrument(skip(self), err)]
    async fn delete_target(&self, project: &str, target: &str) -> Result<(), BrokerError> {
        self.delete(&target_role_path(project, target)).await?;
        tracing::info!(project, target, "target deleted");
        Ok(())
    }

    async fn get_target(&self, project: &str, target: &str) -> Result<Target, BrokerError> {
        let role = self
            .read(&target_role_path(project, target))
            .await?
            .ok_or_else(|| BrokerError::NotFound("target".into()))?;

        let credential_type = string_at(&role, "/data/credential_type")?
            .parse::<CredentialType>()
            .map_err(BrokerError::Backend)?;
        let role_arn = role
            .pointer("/data/role_arns/0")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let policy_arns = role
            .pointer("/data/policy_arns")
            .and_then(Value::as_array)
            .map(|arns| {
                arns.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Target {
            name: target.to_owned(),
            kind: TargetType::AwsAccount,
            properties: TargetProperties {
                credential_type,
                role_arn,
                policy_arns,
            },
        })
    }

    async fn target_exists(&self, project: &str, target: &str) -> Result<bool, BrokerError> {
        Ok(self.read(&target_role_path(project, target)).await?.is_some())
    }

    async fn list_targets(&self, project: &str) -> Result<Vec<String>, BrokerError> {
        let Some(listing) = self.read("aws/roles?list=true").await? else {
            return Ok(Vec::new());
        };
        let prefix = target_role_prefix(project);
        let mut targets: Vec<String> = listing
            .pointer("/data/keys")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(str::to_owned)
            .collect();
        targets.sort();
        Ok(targets)
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Admin callers act through the service's own `AppRole`; user callers act
/// with the token they presented.
pub struct VaultProviderFactory {
    client: VaultClient,
    role_id: String,
    secret_id: String,
}

impl VaultProviderFactory {
    pub fn new(client: VaultClient, role_id: impl Into<String>, secret_id: impl Into<String>) -> Self {
        Self {
            client,
            role_id: role_id.into(),
            secret_id: secret_id.into(),
        }
    }
}

#[async_trait]
impl CredentialProviderFactory for VaultProviderFactory {
    async fn provider(&self, caller: &Caller) -> Result<Box<dyn CredentialBroker>, BrokerError> {
        let token = match caller {
            Caller::Admin => {
                self.client
                    .approle_login(&self.role_id, &self.secret_id)
                    .await?
            }
            Caller::User { token } => token.clone(),
        };
        Ok(Box::new(self.client.with_token(token)))
    }
}
