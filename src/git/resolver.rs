use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::sync::Mutex;

use super::{GitError, ManifestSource};
use crate::validation::is_contained_path;

/// Longest sanitized URL prefix kept in a cache directory name.
const MAX_KEY_PREFIX: usize = 64;

/// Cache directory name for a repository URL: a readable prefix plus the
/// first 16 hex characters of the URL's SHA-256.
pub fn cache_key(repository: &str) -> String {
    let sanitized: String = repository
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_KEY_PREFIX)
        .collect();
    let digest = hex::encode(Sha256::digest(repository.as_bytes()));
    format!("{sanitized}-{}", &digest[..16])
}

/// `GIT_SSH_COMMAND` for a key file. Git runs it through a shell, so the
/// path is single-quoted.
fn ssh_command(key: &Path) -> String {
    let quoted = key.display().to_string().replace('\'', r"'\''");
    format!("ssh -i '{quoted}' -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new")
}

/// Local clone cache shared by every request.
///
/// A single lock serializes each clone/open/checkout/read sequence, so two
/// requests never observe each other's working tree.
pub struct GitManifestResolver {
    cache_dir: PathBuf,
    ssh_key: Option<PathBuf>,
    timeout: Duration,
    lock: Mutex<()>,
}

impl GitManifestResolver {
    pub fn new(cache_dir: impl Into<PathBuf>, ssh_key: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ssh_key,
            timeout,
            lock: Mutex::new(()),
        }
    }

    fn repo_dir(&self, repository: &str) -> PathBuf {
        self.cache_dir.join(cache_key(repository))
    }

    /// Run `git` with a deadline. A non-zero exit is returned, not an error.
    async fn run<I, S>(&self, dir: Option<&Path>, op: &str, args: I) -> Result<Output, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        if let Some(dir) = dir {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(key) = &self.ssh_key {
            cmd.env("GIT_SSH_COMMAND", ssh_command(key));
        }

        tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                GitError::Fetch(format!(
                    "git {op} timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| GitError::Fetch(format!("failed to run git {op}: {e}")))
    }

    async fn run_ok<I, S>(&self, dir: Option<&Path>, op: &str, args: I) -> Result<Output, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(dir, op, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::Fetch(format!("git {op} failed: {}", stderr.trim())));
        }
        Ok(output)
    }

    async fn clone_repo(&self, repository: &str, dest: &Path) -> Result<(), GitError> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| GitError::Fetch(format!("failed to create repository cache: {e}")))?;

        let args: [&OsStr; 5] = [
            "clone".as_ref(),
            "--no-checkout".as_ref(),
            "--".as_ref(),
            repository.as_ref(),
            dest.as_os_str(),
        ];
        if let Err(e) = self.run_ok(None, "clone", args).await {
            // A half-written clone would be mistaken for a cached one.
            let _ = tokio::fs::remove_dir_all(dest).await;
            return Err(e);
        }
        tracing::info!(repository, path = %dest.display(), "repository cloned");
        Ok(())
    }

    async fn has_commit(&self, dir: &Path, commit: &str) -> Result<bool, GitError> {
        let object = format!("{commit}^{{commit}}");
        let output = self
            .run(Some(dir), "cat-file", ["cat-file", "-e", object.as_str()])
            .await?;
        Ok(output.status.success())
    }

    async fn checkout(&self, dir: &Path, commit: &str) -> Result<(), GitError> {
        if !self.has_commit(dir, commit).await? {
            tracing::debug!(commit, "commit not cached, fetching");
            self.run_ok(Some(dir), "fetch", ["fetch", "--tags", "--force", "origin"])
                .await?;
        }
        self.run_ok(
            Some(dir),
            "checkout",
            ["checkout", "--force", "--detach", commit],
        )
        .await?;
        self.run_ok(Some(dir), "reset", ["reset", "--hard", "HEAD"])
            .await?;
        Ok(())
    }

    async fn read_file(dir: &Path, path: &str) -> Result<Vec<u8>, GitError> {
        if !is_contained_path(path) {
            return Err(GitError::NotFound(path.to_owned()));
        }
        let root = tokio::fs::canonicalize(dir)
            .await
            .map_err(|e| GitError::Fetch(format!("repository cache unreadable: {e}")))?;
        let Ok(full) = tokio::fs::canonicalize(root.join(path)).await else {
            return Err(GitError::NotFound(path.to_owned()));
        };
        // Symlinks in the tree must not lead outside the clone.
        if !full.starts_with(&root) {
            return Err(GitError::NotFound(path.to_owned()));
        }

        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|_| GitError::NotFound(path.to_owned()))?;
        if meta.is_dir() {
            return Err(GitError::NotAFile(path.to_owned()));
        }
        tokio::fs::read(&full)
            .await
            .map_err(|e| GitError::Fetch(format!("failed to read '{path}': {e}")))
    }
}

#[async_trait]
impl ManifestSource for GitManifestResolver {
    #[tracing::instrument(skip(self), err)]
    async fn get_manifest_file(
        &self,
        repository: &str,
        commit_hash: &str,
        path: &str,
    ) -> Result<Vec<u8>, GitError> {
        if repository.starts_with('-') || commit_hash.starts_with('-') {
            return Err(GitError::Fetch("invalid repository or commit".into()));
        }

        let _guard = self.lock.lock().await;
        let dir = self.repo_dir(repository);

        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            self.run_ok(Some(&dir), "rev-parse", ["rev-parse", "--git-dir"])
                .await
                .map_err(|e| GitError::Fetch(format!("cached repository is unusable: {e}")))?;
        } else {
            self.clone_repo(repository, &dir).await?;
        }

        self.checkout(&dir, commit_hash).await?;
        Self::read_file(&dir, path).await
    }
}
