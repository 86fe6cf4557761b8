//! Manifest files fetched from git remotes at an exact commit.

pub mod resolver;

use async_trait::async_trait;

use crate::error::ApiError;

pub use resolver::GitManifestResolver;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Clone, open, fetch or checkout failed (including timeouts).
    #[error("{0}")]
    Fetch(String),

    #[error("path '{0}' not found")]
    NotFound(String),

    #[error("path provided is not a file '{0}'")]
    NotAFile(String),
}

impl From<GitError> for ApiError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::Fetch(msg) => Self::Backend(msg),
            GitError::NotFound(path) => Self::NotFound(format!("path '{path}'")),
            GitError::NotAFile(path) => Self::NotAFile(path),
        }
    }
}

#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Full contents of `path` as committed at `commit_hash` in `repository`.
    async fn get_manifest_file(
        &self,
        repository: &str,
        commit_hash: &str,
        path: &str,
    ) -> Result<Vec<u8>, GitError>;
}
