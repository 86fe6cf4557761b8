//! Per-project and per-target credential material held in the secret backend.
//!
//! The backend is the system of record: existence of a project or target is
//! always re-queried, never cached here.

pub mod error;
pub mod vault;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::Caller;

pub use error::BrokerError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// Identity material returned once, at project creation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCredentials {
    pub role_id: String,
    pub secret_id: String,
}

impl fmt::Debug for ProjectCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectCredentials")
            .field("role_id", &self.role_id)
            .field("secret_id", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    AwsAccount,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwsAccount => "aws_account",
        }
    }
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aws_account" => Ok(Self::AwsAccount),
            other => Err(format!("type must be aws_account (got '{other}')")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    #[default]
    AssumedRole,
}

impl CredentialType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssumedRole => "assumed_role",
        }
    }
}

impl FromStr for CredentialType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assumed_role" => Ok(Self::AssumedRole),
            other => Err(format!("credential_type must be assumed_role (got '{other}')")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProperties {
    pub credential_type: CredentialType,
    pub role_arn: String,
    #[serde(default)]
    pub policy_arns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TargetType,
    pub properties: TargetProperties,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Operations against the secret backend, scoped to one caller's token.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn create_project(
        &self,
        name: &str,
        repository: Option<&str>,
    ) -> Result<ProjectCredentials, BrokerError>;

    async fn delete_project(&self, name: &str) -> Result<(), BrokerError>;

    async fn get_project(&self, name: &str) -> Result<Project, BrokerError>;

    async fn project_exists(&self, name: &str) -> Result<bool, BrokerError>;

    async fn create_target(&self, project: &str, target: &Target) -> Result<(), BrokerError>;

    async fn delete_target(&self, project: &str, target: &str) -> Result<(), BrokerError>;

    async fn get_target(&self, project: &str, target: &str) -> Result<Target, BrokerError>;

    async fn target_exists(&self, project: &str, target: &str) -> Result<bool, BrokerError>;

    async fn list_targets(&self, project: &str) -> Result<Vec<String>, BrokerError>;
}

/// Builds a broker bound to the credentials of a single request's caller.
#[async_trait]
pub trait CredentialProviderFactory: Send + Sync {
    async fn provider(&self, caller: &Caller) -> Result<Box<dyn CredentialBroker>, BrokerError>;
}
