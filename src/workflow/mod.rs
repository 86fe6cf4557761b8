//! Workflow executions, delegated to the execution engine.

pub mod argo;
pub mod catalog;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;

pub use argo::ArgoWorkflows;
pub use catalog::WorkflowCatalog;

/// Label keys attached to every submitted execution.
pub const PROJECT_LABEL: &str = "cloudops.io/project";
pub const TARGET_LABEL: &str = "cloudops.io/target";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Phase {
    pub fn from_engine(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed" | "Error") => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub name: String,
    pub status: Phase,
    pub created: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowLogs {
    pub logs: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Prefix the engine appends a random suffix to.
    pub generate_name: String,
    pub labels: BTreeMap<String, String>,
    pub parameters: BTreeMap<String, String>,
}

/// Execution name prefix for a project/target pair.
pub fn generate_name(project: &str, target: &str) -> String {
    format!("{project}-{target}-").to_lowercase()
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error("{0}")]
    Backend(String),
}

impl From<reqwest::Error> for WorkflowError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Backend("workflow engine request timed out".into())
        } else {
            Self::Backend(format!("workflow engine request failed: {err}"))
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::NotFound(name) => Self::NotFound(format!("workflow '{name}'")),
            WorkflowError::Backend(msg) => Self::Backend(msg),
        }
    }
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Submit an execution of `template`; returns the assigned name.
    async fn submit(&self, template: &str, opts: &SubmitOptions) -> Result<String, WorkflowError>;

    async fn status(&self, name: &str) -> Result<WorkflowStatus, WorkflowError>;

    async fn logs(&self, name: &str) -> Result<WorkflowLogs, WorkflowError>;

    /// Forward log lines to `sink` until the execution ends, the sink
    /// closes, or `cancel` fires.
    async fn log_stream(
        &self,
        name: &str,
        sink: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), WorkflowError>;

    /// Names of every execution in the engine's namespace.
    async fn list(&self) -> Result<Vec<String>, WorkflowError>;
}
